use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::driver::ExecutionReport;
use crate::fragment::Fragment;
use crate::graph::MergeStats;
use crate::registry::BuildProductRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    Distributed,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub mode: TargetMode,
    pub graph_files: usize,
    pub tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub millis: u128,
}

/// Summary of one run, written as JSON into the log directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub clean: bool,
    pub targets: Vec<TargetReport>,
    pub merge: Option<MergeStats>,
    pub execution: Option<ExecutionReport>,
    pub products: Vec<Utf8PathBuf>,
    pub library_products: Vec<Utf8PathBuf>,
    pub phases: Vec<PhaseTiming>,
}

impl RunReport {
    pub fn new(clean: bool) -> Self {
        Self {
            clean,
            ..Default::default()
        }
    }

    pub fn direct(&mut self, caption: impl Into<String>) {
        self.targets.push(TargetReport {
            target: caption.into(),
            mode: TargetMode::Direct,
            graph_files: 0,
            tasks: 0,
        });
    }

    pub fn distributed(&mut self, fragment: &Fragment) {
        self.targets.push(TargetReport {
            target: fragment.caption.clone(),
            mode: TargetMode::Distributed,
            graph_files: fragment.parts.len(),
            tasks: fragment.task_count(),
        });
    }

    /// Records the time elapsed since `start` under `phase`.
    pub fn phase(&mut self, phase: &'static str, start: Instant) {
        self.phases.push(PhaseTiming {
            phase,
            millis: start.elapsed().as_millis(),
        });
    }

    pub fn products(&mut self, registry: &BuildProductRegistry) {
        self.products = registry.all().to_vec();
        self.library_products = registry.library_products().to_vec();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes `Report.<n>.json` into `log_dir` and returns its path.
    pub fn write(&self, log_dir: &Utf8Path) -> io::Result<Utf8PathBuf> {
        let json = self.to_json().map_err(io::Error::other)?;
        fs::create_dir_all(log_dir)?;
        let path = crate::io::unique_path(log_dir, "Report", ".json");
        fs::write(&path, json)?;
        Ok(path)
    }
}
