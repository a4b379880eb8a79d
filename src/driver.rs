//! Submitting the unified graph to the distributed engine, retrying, and
//! reconciling what it produced.
//!
//! Each submission is classified as one of:
//!
//! * **success**: exit code 0;
//! * **transient failure**: one of the connection-timeout exit codes with no
//!   per-project progress in the output, meaning the engine never got to
//!   build anything. The same descriptor is resubmitted after a pause, while
//!   the connection-retry budget lasts;
//! * **hard failure**: anything else. Every product declared by the merged
//!   manifests is deleted and the whole attempt starts over, up to the
//!   configured number of attempts.
//!
//! The connection-retry budget is shared by all attempts of a run.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{Level, debug, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::TargetSpec;
use crate::error::{ManifestError, ProviderError, SubmitError, TsumugiError};
use crate::fragment::Fragment;
use crate::graph::UnifiedGraph;
use crate::manifest::Manifest;
use crate::process::{Captured, Invocation, ProcessSupervisor, locate_program};
use crate::provider::TargetProvider;
use crate::registry::BuildProductRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    TransientFailure,
    HardFailure,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub connection_retries: u32,
    /// Full attempts; 2 on automated runs, 1 otherwise.
    pub attempts: u32,
    pub backoff: Duration,
    pub transient_exit_codes: Vec<i32>,
    pub progress_marker: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connection_retries: 4,
            attempts: 1,
            backoff: Duration::from_secs(60),
            transient_exit_codes: vec![2, 4],
            progress_marker: "------Project:".into(),
        }
    }
}

impl RetryPolicy {
    pub fn automated(mut self, automated: bool) -> Self {
        self.attempts = if automated { 2 } else { 1 };
        self
    }

    pub fn classify(&self, exit_code: Option<i32>, output: &str) -> Outcome {
        match exit_code {
            Some(0) => Outcome::Success,
            Some(code)
                if self.transient_exit_codes.contains(&code)
                    && !output.contains(&self.progress_marker) =>
            {
                Outcome::TransientFailure
            }
            _ => Outcome::HardFailure,
        }
    }
}

/// The external distributed build engine.
pub trait DistributedEngine {
    fn name(&self) -> &str;

    /// Runs the engine on `descriptor` and waits for it to exit.
    fn submit(&self, descriptor: &Utf8Path) -> Result<Captured, SubmitError>;
}

/// Runs the engine executable as `<program> "<descriptor>" <args> [stop flag]`
/// from the source root.
pub struct CommandEngine {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
    pub stop_on_errors: Option<String>,
    pub source_root: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub supervisor: Arc<dyn ProcessSupervisor>,
}

impl CommandEngine {
    /// Finds the engine executable. `None` when it is not installed, in
    /// which case the caller builds everything directly.
    pub fn locate(
        program: &str,
        args: Vec<String>,
        stop_on_errors: Option<String>,
        source_root: Utf8PathBuf,
        log_dir: Utf8PathBuf,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Option<Self> {
        let program = locate_program(program)?;
        debug!("Found distributed engine at {program}");

        Some(Self {
            program,
            args,
            stop_on_errors,
            source_root,
            log_dir,
            supervisor,
        })
    }
}

impl DistributedEngine for CommandEngine {
    fn name(&self) -> &str {
        self.program.file_name().unwrap_or(self.program.as_str())
    }

    fn submit(&self, descriptor: &Utf8Path) -> Result<Captured, SubmitError> {
        let captured = Invocation::new(self.program.as_str())
            .arg(descriptor.as_str())
            .args(self.args.iter().cloned())
            .args(self.stop_on_errors.iter().cloned())
            .cwd(self.source_root.clone())
            .run_and_log(&self.log_dir, "Engine", self.supervisor.as_ref())?;

        Ok(captured)
    }
}

/// What happened during [`Driver::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub submissions: u32,
    pub connection_retries: u32,
    pub attempts: u32,
    pub products_added: usize,
    pub last_log: Option<Utf8PathBuf>,
}

pub struct Driver<'a> {
    engine: &'a dyn DistributedEngine,
    policy: RetryPolicy,
}

impl<'a> Driver<'a> {
    pub fn new(engine: &'a dyn DistributedEngine, policy: RetryPolicy) -> Self {
        Self { engine, policy }
    }

    /// Submits the descriptor already written to `descriptor` and, once the
    /// engine succeeds, registers every product the fragments declared.
    ///
    /// An empty graph is a trivial success: nothing is submitted but the
    /// manifests are still reconciled.
    pub fn execute(
        &self,
        graph: &UnifiedGraph,
        descriptor: &Utf8Path,
        fragments: &[Fragment],
        registry: &mut BuildProductRegistry,
    ) -> Result<ExecutionReport, TsumugiError> {
        let mut report = ExecutionReport::default();

        if graph.is_empty() {
            info!("Nothing to distribute, everything is up to date");
        } else {
            self.submit_with_retries(descriptor, fragments, &mut report)?;
        }

        for fragment in fragments {
            report.products_added += registry.reconcile(&fragment.manifest, &fragment.caption)?;
        }

        Ok(report)
    }

    fn submit_with_retries(
        &self,
        descriptor: &Utf8Path,
        fragments: &[Fragment],
        report: &mut ExecutionReport,
    ) -> Result<(), SubmitError> {
        let attempts = self.policy.attempts.max(1);
        let mut budget = self.policy.connection_retries;

        let mut attempt = 0;

        loop {
            attempt += 1;
            report.attempts = attempt;

            match self.attempt(descriptor, &mut budget, report) {
                Ok(()) => {
                    info!("{} finished", self.engine.name());
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        "{} failed on try {attempt}, deleting products to force a rebuild: {err}",
                        self.engine.name()
                    );
                    for fragment in fragments {
                        delete_products(&fragment.manifest)?;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(
        &self,
        descriptor: &Utf8Path,
        budget: &mut u32,
        report: &mut ExecutionReport,
    ) -> Result<(), SubmitError> {
        let span = tracing::span!(Level::INFO, "submit");
        span.pb_set_style(&crate::io::spinner_style());
        span.pb_set_message(&format!("Running {}", self.engine.name()));
        let _enter = span.enter();

        loop {
            let captured = self.engine.submit(descriptor)?;
            report.submissions += 1;
            report.last_log = Some(captured.log.clone());

            match self.policy.classify(captured.exit_code, &captured.output) {
                Outcome::Success => return Ok(()),
                Outcome::TransientFailure if *budget > 0 => {
                    warn!(
                        "{} failed on the local connection timeout, resubmitting ({} retries left)",
                        self.engine.name(),
                        *budget - 1
                    );
                    *budget -= 1;
                    report.connection_retries += 1;
                    if !self.policy.backoff.is_zero() {
                        thread::sleep(self.policy.backoff);
                    }
                }
                _ => {
                    return Err(SubmitError::HardFailure {
                        engine: self.engine.name().to_string(),
                        status: captured
                            .exit_code
                            .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}")),
                        attempts: report.attempts,
                        log: captured.log,
                    });
                }
            }
        }
    }
}

fn delete_products(manifest: &Manifest) -> Result<(), SubmitError> {
    let count = manifest.delete_products().map_err(|err| match err {
        ManifestError::Io { path, source } => SubmitError::Cleanup { path, source },
        ManifestError::Xml { path, source } => SubmitError::Cleanup {
            path,
            source: std::io::Error::other(source.to_string()),
        },
    })?;

    debug!("Deleted {count} product(s)");
    Ok(())
}

/// Builds a target without the distributed engine and registers its
/// products right away. Failures are not retried.
pub fn build_direct(
    provider: &dyn TargetProvider,
    target: &TargetSpec,
    manifest_path: &Utf8Path,
    log_dir: &Utf8Path,
    registry: &mut BuildProductRegistry,
) -> Result<usize, ProviderError> {
    let io_err = |path: &Utf8Path| {
        let path = path.to_owned();
        move |source: std::io::Error| ProviderError::Io { path, source }
    };

    crate::io::remove_file_if_exists(manifest_path).map_err(io_err(manifest_path))?;
    provider.build(target, manifest_path)?;

    if !manifest_path.is_file() {
        return Err(ProviderError::ManifestMissing {
            target: target.id.clone(),
            path: manifest_path.to_owned(),
        });
    }

    let saved = crate::io::copy_numbered(manifest_path, log_dir, "Manifest", ".xml")
        .map_err(io_err(manifest_path))?;
    let manifest = Manifest::read(&saved)?;
    let added = registry.reconcile(&manifest, &target.id.to_string())?;

    info!("Built {} directly, {added} new product(s)", target.id);
    Ok(added)
}
