//! The per-target build manifest written by the compiler front-end.
//!
//! A manifest lists every file a target is expected to produce:
//!
//! ```xml
//! <BuildManifest>
//!   <BuildProducts>
//!     <string>/work/Binaries/Win64/Game.exe</string>
//!     <string>/work/Binaries/Win64/Game.target</string>
//!   </BuildProducts>
//!   <LibraryBuildProducts>
//!     <string>/work/Binaries/Win64/Game.lib</string>
//!   </LibraryBuildProducts>
//! </BuildManifest>
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;

use crate::error::ManifestError;
use crate::xml::XmlSafe;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// Files the target produces; each must exist once the target is built.
    pub build_products: Vec<Utf8PathBuf>,
    /// Import libraries and similar; reported but never existence-checked.
    pub library_build_products: Vec<Utf8PathBuf>,
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Products,
    Libraries,
}

impl Manifest {
    pub fn new<I, P>(products: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            build_products: products.into_iter().map(Into::into).collect(),
            library_build_products: Vec::new(),
        }
    }

    pub fn read(path: &Utf8Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text).map_err(|source| ManifestError::Xml {
            path: path.to_owned(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut manifest = Manifest::default();
        let mut section = Section::None;
        let mut in_string = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"BuildProducts" => section = Section::Products,
                    b"LibraryBuildProducts" => section = Section::Libraries,
                    b"string" => in_string = true,
                    _ => {}
                },
                Event::End(e) => match e.name().as_ref() {
                    b"BuildProducts" | b"LibraryBuildProducts" => section = Section::None,
                    b"string" => in_string = false,
                    _ => {}
                },
                Event::Text(t) if in_string => {
                    let path = Utf8PathBuf::from(t.unescape()?.trim());
                    match section {
                        Section::Products => manifest.build_products.push(path),
                        Section::Libraries => manifest.library_build_products.push(path),
                        Section::None => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(manifest)
    }

    pub fn to_xml(&self) -> String {
        let mut buf = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<BuildManifest>\n");

        for (tag, list) in [
            ("BuildProducts", &self.build_products),
            ("LibraryBuildProducts", &self.library_build_products),
        ] {
            buf.push_str(&format!("  <{tag}>\n"));
            for path in list {
                buf.push_str(&format!("    <string>{}</string>\n", XmlSafe(path.as_str())));
            }
            buf.push_str(&format!("  </{tag}>\n"));
        }

        buf.push_str("</BuildManifest>\n");
        buf
    }

    pub fn write(&self, path: &Utf8Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_xml())
    }

    /// Build receipts the front-end writes up front, before compiling.
    pub fn receipts(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.build_products.iter().filter(|p| is_receipt(p))
    }

    /// Removes every declared build product. Files already gone are skipped.
    /// Returns how many files were actually deleted.
    pub fn delete_products(&self) -> Result<usize, ManifestError> {
        let mut deleted = 0;

        for path in &self.build_products {
            if !path.exists() {
                continue;
            }
            crate::io::remove_file_if_exists(path).map_err(|source| ManifestError::Io {
                path: path.clone(),
                source,
            })?;
            deleted += 1;
        }

        Ok(deleted)
    }
}

/// Receipts describe a target rather than being compiled output.
pub fn is_receipt(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("target"))
}
