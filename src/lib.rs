#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod build;
pub mod cli;
pub mod config;
mod core;
pub mod diagnostics;
pub mod driver;
mod error;
pub mod fragment;
pub mod graph;
mod io;
#[cfg(feature = "logging")]
mod logging;
pub mod manifest;
pub mod process;
pub mod provider;
pub mod registry;
#[cfg(test)]
mod testing;
mod xml;

pub use crate::build::{Build, BuildOptions, BuildOutcome, merge_files};
pub use crate::config::Config;
pub use crate::core::{TargetId, TargetSpec};
pub use crate::driver::{CommandEngine, DistributedEngine, Driver, ExecutionReport, Outcome, RetryPolicy};
pub use crate::error::*;
pub use crate::fragment::{Fragment, FragmentLoader, GraphPart};
pub use crate::graph::{EmitOptions, SharedPchRule, UnifiedGraph};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::manifest::Manifest;
pub use crate::provider::{CommandProvider, TargetProvider};
pub use crate::registry::BuildProductRegistry;
