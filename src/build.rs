//! One complete build: clean, direct builds, export, merge, distributed
//! execution and the final product check.

use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;
use tracing::{Level, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::core::{TargetId, TargetSpec};
use crate::diagnostics::RunReport;
use crate::driver::{CommandEngine, DistributedEngine, Driver, build_direct};
use crate::error::{EmitError, TsumugiError};
use crate::fragment::{Fragment, FragmentLoader, GraphPart};
use crate::graph::{EmitOptions, SharedPchRule, UnifiedGraph, merge};
use crate::manifest::Manifest;
use crate::process::ProcessSupervisor;
use crate::provider::{CommandProvider, TargetProvider};
use crate::registry::BuildProductRegistry;

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Hand distributable targets to the engine. Off means every target is
    /// built directly.
    pub distributed: bool,
    pub clean: bool,
    /// Automated runs retry a failed distributed build once more.
    pub automated: bool,
    pub show_progress: bool,
    pub stop_on_errors: bool,
    pub strict_task_order: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            distributed: true,
            clean: false,
            automated: false,
            show_progress: false,
            stop_on_errors: false,
            strict_task_order: false,
        }
    }
}

/// What a successful build leaves behind.
#[derive(Debug)]
pub struct BuildOutcome {
    pub registry: BuildProductRegistry,
    pub report: RunReport,
    pub report_path: Utf8PathBuf,
}

pub fn command_provider(config: &Config, supervisor: Arc<dyn ProcessSupervisor>) -> CommandProvider {
    CommandProvider {
        program: config.frontend.program.clone(),
        args: config.frontend.args.clone(),
        source_root: config.source_root.clone(),
        log_dir: config.log_dir.clone(),
        targets: config.targets.clone(),
        non_distributed_targets: config.non_distributed_targets.clone(),
        distributed_platforms: config.distributed_platforms.clone(),
        supervisor,
    }
}

pub fn command_engine(
    config: &Config,
    options: &BuildOptions,
    supervisor: Arc<dyn ProcessSupervisor>,
) -> Option<CommandEngine> {
    let stop = options
        .stop_on_errors
        .then(|| config.engine.stop_on_errors_arg.clone());

    CommandEngine::locate(
        &config.engine.program,
        config.engine.args.clone(),
        stop,
        config.source_root.clone(),
        config.log_dir.clone(),
        supervisor,
    )
}

/// Merges graph files without the front-end, one fragment per file, named
/// after the file without its `.xge.xml` suffix.
pub fn merge_files(
    files: &[Utf8PathBuf],
    rule: SharedPchRule,
    strict_task_order: bool,
) -> Result<UnifiedGraph, TsumugiError> {
    let mut fragments = Vec::with_capacity(files.len());

    for file in files {
        let part = GraphPart::read(file)?;
        if strict_task_order {
            part.validate_order()?;
        }

        let name = file
            .file_name()
            .map(|name| name.strip_suffix(".xge.xml").unwrap_or(name))
            .unwrap_or(file.as_str());
        let target = TargetSpec::new(TargetId::new(name, "Any", "Offline"));
        let mut fragment = Fragment::new(target, vec![part], Manifest::default());
        fragment.caption = name.to_string();
        fragments.push(fragment);
    }

    Ok(merge(&fragments, rule)?)
}

pub struct Build<'a> {
    config: &'a Config,
    provider: &'a dyn TargetProvider,
    engine: Option<&'a dyn DistributedEngine>,
    options: BuildOptions,
}

impl<'a> Build<'a> {
    pub fn new(
        config: &'a Config,
        provider: &'a dyn TargetProvider,
        engine: Option<&'a dyn DistributedEngine>,
        options: BuildOptions,
    ) -> Self {
        Self {
            config,
            provider,
            engine,
            options,
        }
    }

    pub fn run(&self, targets: &[TargetSpec]) -> Result<BuildOutcome, TsumugiError> {
        let start = Instant::now();
        let mut registry = BuildProductRegistry::new();
        let mut report = RunReport::new(self.options.clean);

        if self.options.clean {
            let s = Instant::now();
            for target in targets {
                self.provider.clean(target)?;
            }
            report.phase("clean", s);
            info!("Cleaned {} target(s) {}", targets.len(), crate::io::as_overhead(s));
        }

        let engine = match (self.options.distributed, self.engine) {
            (true, None) => {
                warn!("Distributed engine not found, building every target directly");
                None
            }
            (true, engine) => engine,
            (false, _) => None,
        };

        let (distributed, direct): (Vec<&TargetSpec>, Vec<&TargetSpec>) = targets
            .iter()
            .partition(|target| engine.is_some() && self.provider.can_distribute(target));

        if !direct.is_empty() {
            let s = Instant::now();
            for target in direct {
                build_direct(
                    self.provider,
                    target,
                    &self.config.manifest,
                    &self.config.log_dir,
                    &mut registry,
                )?;
                report.direct(target.id.to_string());
            }
            report.phase("direct", s);
        }

        if let Some(engine) = engine.filter(|_| !distributed.is_empty()) {
            self.distribute(engine, &distributed, &mut registry, &mut report)?;
        }

        registry.finalize()?;
        report.products(&registry);
        report.phase("total", start);

        let report_path = report.write(&self.config.log_dir)?;
        info!("Build finished {}", crate::io::as_overhead(start));

        Ok(BuildOutcome {
            registry,
            report,
            report_path,
        })
    }

    fn distribute(
        &self,
        engine: &dyn DistributedEngine,
        targets: &[&TargetSpec],
        registry: &mut BuildProductRegistry,
        report: &mut RunReport,
    ) -> Result<(), TsumugiError> {
        let s = Instant::now();
        let fragments = self.export(targets, registry)?;
        for fragment in &fragments {
            report.distributed(fragment);
        }
        report.phase("export", s);

        let s = Instant::now();
        let graph = merge(&fragments, self.config.shared_pch.rule())?;
        report.merge = Some(graph.stats);
        report.phase("merge", s);
        info!(
            "Merged {} graph file(s) into {} task(s), {} tool(s), {} environment(s) {}",
            graph.stats.parts,
            graph.stats.tasks,
            graph.stats.tools,
            graph.stats.environments,
            crate::io::as_overhead(s)
        );

        if graph.is_empty() && self.options.clean {
            return Err(EmitError::EmptyGraph.into());
        }

        let descriptor = crate::io::unique_path(&self.config.log_dir, "Merged", ".xge.xml");
        if !graph.is_empty() {
            let options = EmitOptions {
                show_progress: self.options.show_progress,
            };
            graph.write_descriptor(&descriptor, &options)?;
        }

        let s = Instant::now();
        let policy = self.config.retry.policy(self.options.automated);
        let execution = Driver::new(engine, policy).execute(&graph, &descriptor, &fragments, registry)?;
        report.execution = Some(execution);
        report.phase("execute", s);

        Ok(())
    }

    fn export(
        &self,
        targets: &[&TargetSpec],
        registry: &mut BuildProductRegistry,
    ) -> Result<Vec<Fragment>, TsumugiError> {
        let s = Instant::now();
        let loader = FragmentLoader {
            export_dir: self.config.export_dir.clone(),
            graph_pattern: self.config.graph_pattern.clone(),
            manifest_path: self.config.manifest.clone(),
            log_dir: self.config.log_dir.clone(),
            strict_task_order: self.options.strict_task_order,
        };

        let span = tracing::span!(Level::INFO, "export");
        span.pb_set_style(&crate::io::bar_style());
        span.pb_set_length(targets.len() as u64);
        span.pb_set_message("Exporting graphs...");
        let _enter = span.enter();

        let mut fragments = Vec::with_capacity(targets.len());
        for target in targets {
            span.pb_set_message(&format!("Exporting {}", target.id));
            fragments.push(loader.load(self.provider, target, registry, self.options.clean)?);
            span.pb_inc(1);
        }

        info!("Exported {} target(s) {}", fragments.len(), crate::io::as_overhead(s));
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedProvider, compile_part, scratch};

    fn config(root: &camino::Utf8Path) -> Config {
        let mut config = Config {
            source_root: root.to_owned(),
            log_dir: root.join("logs"),
            export_dir: root.join("export"),
            manifest: root.join("Manifest.xml"),
            ..Default::default()
        };
        config.retry.backoff_secs = 0;
        config
    }

    fn target(name: &str, platform: &str) -> TargetSpec {
        TargetSpec::new(TargetId::new(name, platform, "Development"))
    }

    /// Game and Editor distribute, Tool is built locally.
    fn setup(root: &camino::Utf8Path) -> (ScriptedProvider, Vec<TargetSpec>) {
        let mut provider = ScriptedProvider::new();
        provider.receipts = true;
        provider.local_platforms = vec!["Mac".into()];

        let targets = vec![target("Game", "Win64"), target("Tool", "Mac"), target("Editor", "Win64")];
        provider.fragment(
            &targets[0].id,
            vec![compile_part("Game", "game.cpp", "PATH=/bin")],
            Manifest::new([root.join("bin/Game.exe"), root.join("bin/Game.target")]),
        );
        provider.fragment(&targets[1].id, vec![], Manifest::new([root.join("bin/Tool")]));
        provider.fragment(
            &targets[2].id,
            vec![compile_part("Editor", "editor.cpp", "PATH=/bin")],
            Manifest::new([root.join("bin/Editor.exe")]),
        );

        (provider, targets)
    }

    #[test]
    fn test_distributed_build() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let (provider, targets) = setup(&root);

        let mut engine = ScriptedEngine::new(&config.log_dir, [(Some(0), "")]);
        engine.produces = vec![root.join("bin/Game.exe"), root.join("bin/Editor.exe")];

        let outcome = Build::new(&config, &provider, Some(&engine), BuildOptions::default())
            .run(&targets)
            .unwrap();

        assert_eq!(
            provider.calls(),
            vec![
                "build Tool-Mac-Development",
                "export Game-Win64-Development",
                "export Editor-Win64-Development",
            ]
        );
        assert_eq!(engine.submissions(), 1);

        let descriptor = &engine.descriptors.borrow()[0];
        assert!(descriptor.contains("Name=\"Action0_0\""));
        assert!(descriptor.contains("Name=\"Action1_1\""));
        assert!(descriptor.contains("game.cpp"));
        assert!(descriptor.contains("editor.cpp"));

        assert_eq!(outcome.registry.len(), 4);
        assert!(outcome.registry.contains(&root.join("bin/Game.target")));
        assert!(outcome.report_path.is_file());
        assert_eq!(outcome.report.targets.len(), 3);
        assert_eq!(outcome.report.merge.unwrap().tasks, 4);
        assert!(root.join("logs/Merged.0.xge.xml").is_file());
    }

    #[test]
    fn test_three_targets_share_one_submission() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let mut provider = ScriptedProvider::new();

        let x = TargetSpec::new(TargetId::new("X", "Win64", "Debug"));
        let y = TargetSpec::new(TargetId::new("Y", "Win64", "Debug"));
        let z = TargetSpec::new(TargetId::new("Z", "Mac", "Release"));
        let shared = root.join("bin/Shared.lib");
        provider.fragment(
            &x.id,
            vec![compile_part("X", "shared.cpp", "PATH=/vs")],
            Manifest::new([root.join("bin/X.exe"), shared.clone()]),
        );
        provider.fragment(
            &y.id,
            vec![compile_part("Y", "shared.cpp", "PATH=/vs")],
            Manifest::new([root.join("bin/Y.exe"), shared.clone()]),
        );
        provider.fragment(
            &z.id,
            vec![compile_part("Z", "z.cpp", "PATH=/xcode")],
            Manifest::new([root.join("bin/Z")]),
        );

        let mut engine = ScriptedEngine::new(&config.log_dir, [(Some(0), "")]);
        engine.produces = vec![root.join("bin/X.exe"), root.join("bin/Y.exe"), shared, root.join("bin/Z")];

        let outcome = Build::new(&config, &provider, Some(&engine), BuildOptions::default())
            .run(&[x, y, z])
            .unwrap();

        assert_eq!(engine.submissions(), 1);

        let stats = outcome.report.merge.unwrap();
        assert_eq!(stats.fragments, 3);
        assert_eq!(stats.environments, 2);
        assert_eq!(stats.tasks, 5);
        assert_eq!(stats.duplicate_tasks, 1);

        let products = outcome.registry.all();
        let unique: std::collections::HashSet<_> = products.iter().collect();
        assert_eq!(products.len(), 4);
        assert_eq!(unique.len(), products.len());
        assert_eq!(outcome.report.execution.unwrap().products_added, 4);
    }

    #[test]
    fn test_missing_engine_falls_back_to_direct() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let (provider, targets) = setup(&root);

        let outcome = Build::new(&config, &provider, None, BuildOptions::default())
            .run(&targets)
            .unwrap();

        assert_eq!(
            provider.calls(),
            vec![
                "build Game-Win64-Development",
                "build Tool-Mac-Development",
                "build Editor-Win64-Development",
            ]
        );
        assert_eq!(outcome.registry.len(), 4);
        assert!(outcome.report.merge.is_none());
    }

    #[test]
    fn test_distribution_off_builds_directly() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let (provider, targets) = setup(&root);
        let engine = ScriptedEngine::new(&config.log_dir, [(Some(0), "")]);

        let options = BuildOptions {
            distributed: false,
            ..Default::default()
        };
        Build::new(&config, &provider, Some(&engine), options)
            .run(&targets)
            .unwrap();

        assert_eq!(engine.submissions(), 0);
        assert!(provider.calls().iter().all(|call| call.starts_with("build")));
    }

    #[test]
    fn test_clean_build_with_nothing_to_do_fails() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let mut provider = ScriptedProvider::new();
        let game = target("Game", "Win64");
        provider.fragment(&game.id, vec![], Manifest::default());
        let engine = ScriptedEngine::new(&config.log_dir, [(Some(0), "")]);

        let options = BuildOptions {
            clean: true,
            ..Default::default()
        };
        let err = Build::new(&config, &provider, Some(&engine), options)
            .run(std::slice::from_ref(&game))
            .unwrap_err();

        assert!(matches!(err, TsumugiError::Emit(EmitError::EmptyGraph)));
        assert_eq!(provider.calls(), vec!["clean Game-Win64-Development", "export Game-Win64-Development"]);
        assert_eq!(engine.submissions(), 0);
    }

    #[test]
    fn test_up_to_date_build_skips_engine() {
        let (_guard, root) = scratch();
        let config = config(&root);
        let mut provider = ScriptedProvider::new();
        provider.receipts = true;
        let game = target("Game", "Win64");
        provider.fragment(&game.id, vec![], Manifest::new([root.join("bin/Game.target")]));
        let engine = ScriptedEngine::new(&config.log_dir, [(Some(1), "")]);

        let outcome = Build::new(&config, &provider, Some(&engine), BuildOptions::default())
            .run(std::slice::from_ref(&game))
            .unwrap();

        assert_eq!(engine.submissions(), 0);
        assert_eq!(outcome.registry.len(), 1);
        assert_eq!(outcome.report.execution.unwrap().submissions, 0);
    }

    #[test]
    fn test_merge_files_offline() {
        let (_guard, root) = scratch();
        let a = root.join("Game.xge.xml");
        let b = root.join("Editor.xge.xml");
        fs::write(&a, compile_part("Game", "game.cpp", "PATH=/bin").to_xml()).unwrap();
        fs::write(&b, compile_part("Editor", "game.cpp", "PATH=/bin").to_xml()).unwrap();

        let graph = merge_files(&[a, b], SharedPchRule::default(), true).unwrap();

        assert_eq!(graph.stats.parts, 2);
        assert_eq!(graph.stats.environments, 1);
        assert_eq!(graph.stats.duplicate_tasks, 1);
        assert_eq!(graph.index.tools()[0].group_prefix(), "** For Game-Any-Offline + Editor-Any-Offline");
    }

    #[test]
    fn test_merge_files_keeps_numbered_copies_apart() {
        let (_guard, root) = scratch();
        let a = root.join("Export.0.xge.xml");
        let b = root.join("Export.1.xge.xml");
        fs::write(&a, compile_part("A", "shared.cpp", "").to_xml()).unwrap();
        fs::write(&b, compile_part("B", "shared.cpp", "").to_xml()).unwrap();

        let graph = merge_files(&[a, b], SharedPchRule::default(), false).unwrap();

        let owners: Vec<_> = graph.tasks().map(|(_, t)| t.owner.to_string()).collect();
        assert_eq!(owners, vec!["Export.0-Any-Offline", "Export.0-Any-Offline", "Export.1-Any-Offline"]);
        assert_eq!(
            graph.index.tools()[0].group_prefix(),
            "** For Export.0-Any-Offline + Export.1-Any-Offline"
        );
    }
}
