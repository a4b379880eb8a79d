use camino::Utf8PathBuf;
use thiserror::Error;

use crate::core::TargetId;

/// Top-level error of a run. Each variant names the stage that failed.
#[derive(Debug, Error)]
pub enum TsumugiError {
    #[error("Error while exporting graph fragments:\n{0}")]
    Export(#[from] FragmentError),

    #[error("Error while merging graph fragments:\n{0}")]
    Merge(#[from] MergeError),

    #[error("Error while writing the unified graph:\n{0}")]
    Emit(#[from] EmitError),

    #[error("Error while running the distributed build:\n{0}")]
    Submit(#[from] SubmitError),

    #[error("Error while reconciling build products:\n{0}")]
    Reconcile(#[from] RegistryError),

    #[error("Error while building a target directly:\n{0}")]
    Direct(#[from] ProviderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Couldn't read manifest {path}.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed manifest {path}.\n{source}")]
    Xml {
        path: Utf8PathBuf,
        source: quick_xml::Error,
    },
}

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("Front-end did not produce a manifest for {target}, expected {path}")]
    ManifestMissing { target: TargetId, path: Utf8PathBuf },

    #[error("Couldn't find exported graph file {path} for {target}")]
    MissingGraphFile { target: TargetId, path: Utf8PathBuf },

    #[error("Couldn't access {path}.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed graph file {path}.\n{source}")]
    Xml {
        path: Utf8PathBuf,
        source: quick_xml::Error,
    },

    #[error("Element <{element}> in {path} is missing attribute '{attribute}'")]
    MissingAttribute {
        path: Utf8PathBuf,
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Task '{task}' in {path} depends on '{dependency}', which is not listed before it")]
    TaskOrderViolation {
        path: Utf8PathBuf,
        task: String,
        dependency: String,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Task '{task}' of {target} depends on unknown task '{dependency}' (in {file})")]
    UnresolvedDependency {
        target: TargetId,
        task: String,
        dependency: String,
        file: Utf8PathBuf,
    },

    #[error("Task '{task}' of {target} uses undeclared tool '{tool}' (in {file})")]
    UnknownTool {
        target: TargetId,
        task: String,
        tool: String,
        file: Utf8PathBuf,
    },

    #[error("{target} declares {kind} '{name}' more than once (in {file})")]
    DuplicateName {
        target: TargetId,
        kind: &'static str,
        name: String,
        file: Utf8PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("No graph fragments were merged, there is nothing to submit")]
    EmptyGraph,

    #[error("Couldn't write {path}.\n{source}")]
    Serialization {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Couldn't start '{program}'.\n{source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Couldn't write process log {path}.\n{source}")]
    Log {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("'{engine}' failed with {status} after {attempts} attempt(s), see log file '{log}'")]
    HardFailure {
        engine: String,
        status: String,
        attempts: u32,
        log: Utf8PathBuf,
    },

    #[error("Couldn't delete build product {path} before retrying.\n{source}")]
    Cleanup {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Build product {path} does not exist ({origin})")]
    MissingBuildProduct { path: Utf8PathBuf, origin: String },

    #[error("Build product {path} was registered but no longer exists")]
    BuildProductVanished { path: Utf8PathBuf },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("'{program}' failed for {target} with {status}, see log file '{log}'")]
    Failed {
        program: String,
        target: TargetId,
        status: String,
        log: Utf8PathBuf,
    },

    #[error("Front-end did not produce a manifest for {target}, expected {path}")]
    ManifestMissing { target: TargetId, path: Utf8PathBuf },

    #[error("Couldn't access {path}.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {path}.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse {path}.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}
