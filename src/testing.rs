//! Fakes for the front-end and the distributed engine.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::core::{TargetId, TargetSpec};
use crate::driver::DistributedEngine;
use crate::error::{ProviderError, SubmitError};
use crate::fragment::{GraphPart, TaskDef, ToolDef, Variable};
use crate::manifest::{Manifest, is_receipt};
use crate::process::Captured;
use crate::provider::TargetProvider;

pub(crate) fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

/// A graph file with a compile of `source` followed by a link into
/// `<label>.exe`. `env` is `NAME=value;NAME=value`.
pub(crate) fn compile_part(label: &str, source: &str, env: &str) -> GraphPart {
    let variables = env
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| Variable::new(name, value))
        .collect();

    let mut compile = ToolDef::new("Tool0", "cl.exe", format!("/c {source}"));
    compile.allow_remote = true;
    compile.output_file_masks = "*.obj".into();
    let link = ToolDef::new("Tool1", "link.exe", format!("/out:{label}.exe"));

    GraphPart {
        source: format!("{label}.xge.xml").into(),
        variables,
        tools: vec![compile, link],
        tasks: vec![
            TaskDef::new("Action0", "Tool0", source),
            TaskDef::new("Action1", "Tool1", "").depends_on(["Action0"]),
        ],
    }
}

pub(crate) fn touch(path: &Utf8Path) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(path, "").unwrap();
}

/// A front-end that replays canned graph files and manifests.
pub(crate) struct ScriptedProvider {
    fragments: HashMap<TargetId, (Vec<GraphPart>, Manifest)>,
    pub targets: Vec<TargetSpec>,
    /// Platforms that cannot distribute.
    pub local_platforms: Vec<String>,
    /// Create `.target` receipts during export, like a real front-end.
    pub receipts: bool,
    /// Graph file names exported as symlinks to nothing.
    pub dangling: Vec<String>,
    pub calls: RefCell<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            fragments: HashMap::new(),
            targets: Vec::new(),
            local_platforms: Vec::new(),
            receipts: false,
            dangling: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn fragment(&mut self, id: &TargetId, parts: Vec<GraphPart>, manifest: Manifest) {
        self.fragments.insert(id.clone(), (parts, manifest));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl TargetProvider for ScriptedProvider {
    fn targets(&self) -> Vec<TargetSpec> {
        self.targets.clone()
    }

    fn can_distribute(&self, target: &TargetSpec) -> bool {
        !self.local_platforms.contains(&target.id.platform)
    }

    fn export(
        &self,
        target: &TargetSpec,
        manifest: &Utf8Path,
        export_dir: &Utf8Path,
    ) -> Result<(), ProviderError> {
        self.calls.borrow_mut().push(format!("export {}", target.id));

        let Some((parts, products)) = self.fragments.get(&target.id) else {
            return Ok(());
        };

        fs::create_dir_all(export_dir).unwrap();
        for (i, part) in parts.iter().enumerate() {
            fs::write(export_dir.join(format!("Part{i:02}.xge.xml")), part.to_xml()).unwrap();
        }
        #[cfg(unix)]
        for name in &self.dangling {
            std::os::unix::fs::symlink(export_dir.join("missing"), export_dir.join(name)).unwrap();
        }
        products.write(manifest).unwrap();

        if self.receipts {
            for receipt in products.build_products.iter().filter(|p| is_receipt(p)) {
                touch(receipt);
            }
        }
        Ok(())
    }

    fn build(&self, target: &TargetSpec, manifest: &Utf8Path) -> Result<(), ProviderError> {
        self.calls.borrow_mut().push(format!("build {}", target.id));

        let products = self
            .fragments
            .get(&target.id)
            .map(|(_, m)| m.clone())
            .unwrap_or_default();
        for product in &products.build_products {
            touch(product);
        }
        products.write(manifest).unwrap();
        Ok(())
    }

    fn clean(&self, target: &TargetSpec) -> Result<(), ProviderError> {
        self.calls.borrow_mut().push(format!("clean {}", target.id));
        Ok(())
    }
}

/// An engine that replays canned exit codes. Once the script runs out the
/// last entry repeats.
pub(crate) struct ScriptedEngine {
    script: RefCell<VecDeque<(Option<i32>, String)>>,
    last: RefCell<(Option<i32>, String)>,
    log_dir: Utf8PathBuf,
    /// Files whose existence is recorded at every submission.
    pub watched: Vec<Utf8PathBuf>,
    /// Files created whenever a submission succeeds.
    pub produces: Vec<Utf8PathBuf>,
    pub observed: RefCell<Vec<Vec<bool>>>,
    pub descriptors: RefCell<Vec<String>>,
}

impl ScriptedEngine {
    pub(crate) fn new<I, S>(log_dir: &Utf8Path, script: I) -> Self
    where
        I: IntoIterator<Item = (Option<i32>, S)>,
        S: Into<String>,
    {
        let script: VecDeque<_> = script
            .into_iter()
            .map(|(code, output)| (code, output.into()))
            .collect();

        Self {
            last: RefCell::new(script.back().cloned().unwrap_or((Some(0), String::new()))),
            script: RefCell::new(script),
            log_dir: log_dir.to_owned(),
            watched: Vec::new(),
            produces: Vec::new(),
            observed: RefCell::new(Vec::new()),
            descriptors: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn submissions(&self) -> usize {
        self.observed.borrow().len()
    }
}

impl DistributedEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn submit(&self, descriptor: &Utf8Path) -> Result<Captured, SubmitError> {
        self.observed
            .borrow_mut()
            .push(self.watched.iter().map(|p| p.exists()).collect());
        self.descriptors
            .borrow_mut()
            .push(fs::read_to_string(descriptor).unwrap_or_default());

        let (exit_code, output) = match self.script.borrow_mut().pop_front() {
            Some(next) => next,
            None => self.last.borrow().clone(),
        };

        if exit_code == Some(0) {
            for product in &self.produces {
                touch(product);
            }
        }

        fs::create_dir_all(&self.log_dir).unwrap();
        let log = crate::io::unique_path(&self.log_dir, "Engine", ".txt");
        fs::write(&log, &output).unwrap();

        Ok(Captured {
            exit_code,
            output,
            log,
        })
    }
}
