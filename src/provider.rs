use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::core::TargetSpec;
use crate::error::ProviderError;
use crate::process::{Invocation, ProcessSupervisor};

/// Knows which targets exist and how to drive the compiler front-end for
/// each of them.
pub trait TargetProvider {
    /// Every target this provider can build.
    fn targets(&self) -> Vec<TargetSpec>;

    /// Whether the target may be handed to the distributed engine at all.
    fn can_distribute(&self, target: &TargetSpec) -> bool;

    /// Export-only run: writes graph files into `export_dir` and the manifest
    /// to `manifest` without compiling anything.
    fn export(
        &self,
        target: &TargetSpec,
        manifest: &Utf8Path,
        export_dir: &Utf8Path,
    ) -> Result<(), ProviderError>;

    /// Builds the target locally, writing its manifest to `manifest`.
    fn build(&self, target: &TargetSpec, manifest: &Utf8Path) -> Result<(), ProviderError>;

    /// Removes the target's previous outputs.
    fn clean(&self, target: &TargetSpec) -> Result<(), ProviderError>;
}

/// The header generator is built before everything else and never asked to
/// skip itself.
const HEADER_TOOL: &str = "UnrealHeaderTool";

/// Drives a front-end executable invoked as
/// `<program> <args> <name> <platform> <configuration> [project] [target args] <mode flags>`.
///
/// The front-end writes exported graph files to its own export directory;
/// `export_dir` in the configuration must point there.
pub struct CommandProvider {
    pub program: String,
    pub args: Vec<String>,
    pub source_root: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub targets: Vec<TargetSpec>,
    pub non_distributed_targets: Vec<String>,
    pub distributed_platforms: Vec<String>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
}

impl CommandProvider {
    fn invocation(&self, target: &TargetSpec, flags: &[String]) -> Invocation {
        let mut invocation = Invocation::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(&target.id.name)
            .arg(&target.id.platform)
            .arg(&target.id.configuration)
            .cwd(self.source_root.clone());

        if let Some(project) = &target.project {
            invocation = invocation.arg(project.as_str());
        }

        invocation
            .args(target.args.iter().cloned())
            .args(flags.iter().cloned())
    }

    fn run(&self, target: &TargetSpec, flags: &[String]) -> Result<(), ProviderError> {
        let captured = self
            .invocation(target, flags)
            .run_and_log(&self.log_dir, "Frontend", self.supervisor.as_ref())?;

        if captured.success() {
            return Ok(());
        }

        Err(ProviderError::Failed {
            program: self.program.clone(),
            target: target.id.clone(),
            status: captured
                .exit_code
                .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}")),
            log: captured.log,
        })
    }
}

fn manifest_flag(manifest: &Utf8Path) -> String {
    format!("-manifest={manifest}")
}

impl TargetProvider for CommandProvider {
    fn targets(&self) -> Vec<TargetSpec> {
        self.targets.clone()
    }

    fn can_distribute(&self, target: &TargetSpec) -> bool {
        let excluded = self
            .non_distributed_targets
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&target.id.name));
        let platform = self
            .distributed_platforms
            .iter()
            .any(|platform| platform.eq_ignore_ascii_case(&target.id.platform));

        !excluded && platform
    }

    fn export(
        &self,
        target: &TargetSpec,
        manifest: &Utf8Path,
        _export_dir: &Utf8Path,
    ) -> Result<(), ProviderError> {
        let flags = [
            "-generatemanifest".to_string(),
            "-nobuilduht".to_string(),
            "-xgeexport".to_string(),
            manifest_flag(manifest),
        ];
        self.run(target, &flags)
    }

    fn build(&self, target: &TargetSpec, manifest: &Utf8Path) -> Result<(), ProviderError> {
        info!("Building {} directly", target.id);

        let generate = ["-noxge".to_string(), "-generatemanifest".to_string(), manifest_flag(manifest)];
        self.run(target, &generate)?;

        let compile = ["-noxge".to_string(), manifest_flag(manifest)];
        self.run(target, &compile)
    }

    fn clean(&self, target: &TargetSpec) -> Result<(), ProviderError> {
        info!("Cleaning {}", target.id);

        let mut flags = vec!["-clean".to_string()];
        if !target.id.name.eq_ignore_ascii_case(HEADER_TOOL) {
            flags.push("-nobuilduht".to_string());
        }
        self.run(target, &flags)
    }
}
