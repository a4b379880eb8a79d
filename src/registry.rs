use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::manifest::Manifest;

/// The authoritative set of files produced by a run, consumed by packaging.
///
/// Every path is checked to exist when it is added. Registration is
/// idempotent and membership is an exact, case-sensitive match.
#[derive(Debug, Default)]
pub struct BuildProductRegistry {
    products: Vec<Utf8PathBuf>,
    seen: HashSet<Utf8PathBuf>,
    library_products: Vec<Utf8PathBuf>,
}

impl BuildProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path`, returning `false` when it was already present.
    pub fn add(&mut self, path: impl Into<Utf8PathBuf>, origin: &str) -> Result<bool, RegistryError> {
        let path = path.into();

        if !path.is_file() {
            return Err(RegistryError::MissingBuildProduct {
                path,
                origin: origin.to_string(),
            });
        }

        if self.seen.contains(&path) {
            return Ok(false);
        }

        self.seen.insert(path.clone());
        self.products.push(path);
        Ok(true)
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.seen.contains(path)
    }

    pub fn all(&self) -> &[Utf8PathBuf] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn add_library(&mut self, path: impl Into<Utf8PathBuf>) {
        let path = path.into();
        if !self.library_products.contains(&path) {
            self.library_products.push(path);
        }
    }

    pub fn library_products(&self) -> &[Utf8PathBuf] {
        &self.library_products
    }

    /// Registers every product a manifest declares. Returns the number of
    /// newly registered paths.
    pub fn reconcile(&mut self, manifest: &Manifest, origin: &str) -> Result<usize, RegistryError> {
        let mut added = 0;

        for path in &manifest.build_products {
            if self.add(path.clone(), origin)? {
                added += 1;
            }
        }
        for path in &manifest.library_build_products {
            self.add_library(path.clone());
        }

        Ok(added)
    }

    /// Confirms that everything registered is still on disk right before
    /// packaging starts.
    pub fn finalize(&self) -> Result<(), RegistryError> {
        if self.products.is_empty() {
            warn!("No build products were made");
            return Ok(());
        }

        info!("Build products:");
        for path in &self.products {
            if !path.is_file() {
                return Err(RegistryError::BuildProductVanished { path: path.clone() });
            }
            info!("  {path}");
        }

        if !self.library_products.is_empty() {
            info!("Library build products:");
            for path in &self.library_products {
                info!("  {path}");
            }
        }

        Ok(())
    }
}
