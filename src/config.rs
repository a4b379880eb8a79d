//! Run configuration, read from `tsumugi.toml`.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::core::TargetSpec;
use crate::driver::RetryPolicy;
use crate::error::ConfigError;
use crate::graph::SharedPchRule;

pub const DEFAULT_FILE: &str = "tsumugi.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Working directory of the engine and the front-end.
    pub source_root: Utf8PathBuf,
    /// Diagnostics: manifest and graph copies, engine logs, the run report.
    pub log_dir: Utf8PathBuf,
    /// Where the front-end drops exported graph files.
    pub export_dir: Utf8PathBuf,
    pub graph_pattern: String,
    /// Where the front-end writes its manifest.
    pub manifest: Utf8PathBuf,
    pub frontend: FrontendConfig,
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub shared_pch: SharedPchConfig,
    pub non_distributed_targets: Vec<String>,
    pub distributed_platforms: Vec<String>,
    #[serde(rename = "target")]
    pub targets: Vec<TargetSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: ".".into(),
            log_dir: "Saved/Logs/Tsumugi".into(),
            export_dir: "Engine/Intermediate/Build".into(),
            graph_pattern: "*.xge.xml".into(),
            manifest: "Engine/Intermediate/Build/Manifest.xml".into(),
            frontend: FrontendConfig::default(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            shared_pch: SharedPchConfig::default(),
            non_distributed_targets: vec!["UnrealHeaderTool".into()],
            distributed_platforms: ["Win64", "Win32", "XboxOne", "PS4"]
                .into_iter()
                .map(String::from)
                .collect(),
            targets: Vec::new(),
        }
    }
}

/// `[frontend]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub program: String,
    /// Leading arguments passed before the target triple.
    pub args: Vec<String>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            program: "UnrealBuildTool".into(),
            args: Vec::new(),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute path, or a bare name searched on `PATH`.
    pub program: String,
    pub args: Vec<String>,
    pub stop_on_errors_arg: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "xgConsole".into(),
            args: vec!["/Rebuild".into(), "/MaxCPUS=200".into()],
            stop_on_errors_arg: "/StopOnErrors".into(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub connection_retries: u32,
    pub backoff_secs: u64,
    pub transient_exit_codes: Vec<i32>,
    pub progress_marker: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            connection_retries: policy.connection_retries,
            backoff_secs: policy.backoff.as_secs(),
            transient_exit_codes: policy.transient_exit_codes,
            progress_marker: policy.progress_marker,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self, automated: bool) -> RetryPolicy {
        RetryPolicy {
            connection_retries: self.connection_retries,
            attempts: 1,
            backoff: Duration::from_secs(self.backoff_secs),
            transient_exit_codes: self.transient_exit_codes.clone(),
            progress_marker: self.progress_marker.clone(),
        }
        .automated(automated)
    }
}

/// `[shared_pch]` section. An empty list turns shared-PCH collapsing off.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SharedPchConfig {
    pub segments: Vec<String>,
}

impl Default for SharedPchConfig {
    fn default() -> Self {
        Self {
            segments: SharedPchRule::default().segments().to_vec(),
        }
    }
}

impl SharedPchConfig {
    pub fn rule(&self) -> SharedPchRule {
        SharedPchRule::new(self.segments.iter().cloned())
    }
}

impl Config {
    /// Reads and parses `path`, then anchors relative paths at its directory.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;

        let base = path.parent().unwrap_or(Utf8Path::new(""));
        Ok(config.anchored(base))
    }

    /// Like [`Config::load`], but a missing file yields the defaults anchored
    /// at the file's directory.
    pub fn load_or_default(path: &Utf8Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let base = path.parent().unwrap_or(Utf8Path::new(""));
        Ok(Self::default().anchored(base))
    }

    fn anchored(mut self, base: &Utf8Path) -> Self {
        let anchor = |path: &mut Utf8PathBuf| {
            if path.is_relative() && !base.as_str().is_empty() {
                *path = base.join(&*path);
            }
        };

        anchor(&mut self.source_root);
        anchor(&mut self.log_dir);
        anchor(&mut self.export_dir);
        anchor(&mut self.manifest);
        self
    }

    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.id.name == name)
    }
}
