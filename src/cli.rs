//! Command-line interface definitions.

use anyhow::{Result, bail};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::build::BuildOptions;
use crate::config::{Config, DEFAULT_FILE};
use crate::core::{TargetId, TargetSpec};

/// Merges per-target compile graphs into one distributed build.
#[derive(Debug, Parser)]
#[command(name = "tsumugi", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, short = 'c', global = true, default_value = DEFAULT_FILE)]
    pub config: Utf8PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export, merge and run a distributed build.
    Build(BuildArgs),
    /// Merge exported graph files offline and write the descriptor.
    Merge(MergeArgs),
    /// List the configured targets.
    Targets,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Targets to build, by configured name or as `name:platform:configuration`.
    /// Builds every configured target when omitted.
    pub targets: Vec<String>,

    /// Build every target directly, without the distributed engine.
    #[arg(long)]
    pub local: bool,

    /// Clean every target before building.
    #[arg(long)]
    pub clean: bool,

    /// Unattended run: retry a failed distributed build once more.
    #[arg(long)]
    pub automated: bool,

    /// Make the engine report progress per tool.
    #[arg(long)]
    pub show_progress: bool,

    /// Stop the distributed build on the first error.
    #[arg(long)]
    pub stop_on_errors: bool,

    /// Reject graph files whose tasks are not in dependency order.
    #[arg(long)]
    pub strict_task_order: bool,
}

impl BuildArgs {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            distributed: !self.local,
            clean: self.clean,
            automated: self.automated,
            show_progress: self.show_progress,
            stop_on_errors: self.stop_on_errors,
            strict_task_order: self.strict_task_order,
        }
    }

    /// Resolves the requested targets against the configuration.
    pub fn select(&self, config: &Config) -> Result<Vec<TargetSpec>> {
        if self.targets.is_empty() {
            if config.targets.is_empty() {
                bail!("No targets given and none configured");
            }
            return Ok(config.targets.clone());
        }

        self.targets
            .iter()
            .map(|name| {
                if let Some(target) = config.target(name) {
                    return Ok(target.clone());
                }
                match TargetId::parse_triple(name) {
                    Some(id) => Ok(config
                        .targets
                        .iter()
                        .find(|t| t.id == id)
                        .cloned()
                        .unwrap_or_else(|| TargetSpec::new(id))),
                    None => bail!("Unknown target {name}, expected a configured name or name:platform:configuration"),
                }
            })
            .collect()
    }
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Graph files to merge, one fragment per file, in order.
    #[arg(required = true)]
    pub files: Vec<Utf8PathBuf>,

    /// Where to write the merged descriptor.
    #[arg(long, short = 'o')]
    pub out: Utf8PathBuf,

    /// Also write a Mermaid rendering of the merged graph.
    #[arg(long)]
    pub mermaid: Option<Utf8PathBuf>,

    /// Make the engine report progress per tool.
    #[arg(long)]
    pub show_progress: bool,

    /// Reject graph files whose tasks are not in dependency order.
    #[arg(long)]
    pub strict_task_order: bool,
}
