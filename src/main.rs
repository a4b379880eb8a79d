use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tsumugi::build::{command_engine, command_provider};
use tsumugi::cli::{BuildArgs, Cli, Command, MergeArgs};
use tsumugi::driver::DistributedEngine;
use tsumugi::process::{OsSupervisor, ProcessSupervisor, install_interrupt_handler};
use tsumugi::{Build, Config, EmitOptions, TargetProvider, merge_files};

fn main() -> Result<()> {
    tsumugi::init_logging()?;

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Build(args) => build(&config, &args),
        Command::Merge(args) => merge(&config, &args),
        Command::Targets => targets(&config),
    }
}

fn build(config: &Config, args: &BuildArgs) -> Result<()> {
    let targets = args.select(config)?;
    let options = args.options();

    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(OsSupervisor::new());
    install_interrupt_handler(supervisor.clone()).context("Couldn't install the interrupt handler")?;

    let provider = command_provider(config, supervisor.clone());
    let engine = command_engine(config, &options, supervisor.clone());

    let outcome = Build::new(
        config,
        &provider,
        engine.as_ref().map(|e| e as &dyn DistributedEngine),
        options,
    )
    .run(&targets)?;
    info!(
        "{} build product(s), report in {}",
        outcome.registry.len(),
        outcome.report_path
    );
    Ok(())
}

fn merge(config: &Config, args: &MergeArgs) -> Result<()> {
    let graph = merge_files(&args.files, config.shared_pch.rule(), args.strict_task_order)?;

    let options = EmitOptions {
        show_progress: args.show_progress,
    };
    graph.write_descriptor(&args.out, &options)?;

    if let Some(path) = &args.mermaid {
        fs::write(path, graph.render_mermaid()).with_context(|| format!("Couldn't write {path}"))?;
    }

    info!(
        "Wrote {}: {} task(s), {} duplicate(s) merged",
        args.out, graph.stats.tasks, graph.stats.duplicate_tasks
    );
    Ok(())
}

fn targets(config: &Config) -> Result<()> {
    let provider = command_provider(config, Arc::new(OsSupervisor::new()));

    for target in provider.targets() {
        let mode = if provider.can_distribute(&target) {
            "distributed"
        } else {
            "direct"
        };
        println!("{}\t{mode}", target.id);
    }
    Ok(())
}
