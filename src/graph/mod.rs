//! The unified build graph: canonical environments and tools plus every
//! task of every merged fragment, renamed into one namespace.

mod emit;
mod index;
mod merge;

use std::fmt::Write;

use camino::Utf8PathBuf;
use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use serde::Serialize;

pub use emit::EmitOptions;
pub use index::{
    CanonicalEnvironment, CanonicalIndex, CanonicalTool, EnvironmentId, SharedPchRule, ToolId,
    ToolKey, environment_key,
};
pub use merge::{GlobalTask, Merger, merge};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub fragments: usize,
    /// Graph files merged. Zero means there is nothing to distribute.
    pub parts: usize,
    pub environments: usize,
    pub tools: usize,
    pub tasks: usize,
    /// Tasks that collapsed onto a node created by an earlier graph file.
    pub duplicate_tasks: usize,
}

#[derive(Debug)]
pub struct UnifiedGraph {
    pub index: CanonicalIndex,
    pub(crate) graph: Graph<GlobalTask, ()>,
    /// Every merged graph file, in merge order.
    pub sources: Vec<Utf8PathBuf>,
    pub stats: MergeStats,
}

impl UnifiedGraph {
    pub fn is_empty(&self) -> bool {
        self.stats.parts == 0
    }

    /// Tasks in creation order, which is also a valid execution order.
    pub fn tasks(&self) -> impl Iterator<Item = (NodeIndex, &GlobalTask)> {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    /// Tasks whose tool lives in `env`.
    pub fn tasks_in(&self, env: EnvironmentId) -> impl Iterator<Item = (NodeIndex, &GlobalTask)> {
        self.tasks().filter(move |(_, task)| task.env == env)
    }

    /// Global names of the tasks `index` waits for, in creation order.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<&str> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        deps.sort();
        deps.into_iter()
            .map(|dep| self.graph[dep].name.as_str())
            .collect()
    }

    /// Renders the merged graph as a Mermaid diagram, one subgraph per
    /// environment.
    pub fn render_mermaid(&self) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        for env in self.index.environment_ids() {
            let _ = writeln!(f, "    subgraph {}", self.index.environment(env).name);
            for (index, task) in self.tasks_in(env) {
                let tool = self.index.tool(task.tool);
                let label = task
                    .caption
                    .as_deref()
                    .unwrap_or(&task.source_file)
                    .replace('"', "#quot;");
                let _ = writeln!(
                    f,
                    "        {}[\"{}\\n{}\"]",
                    index.index(),
                    task.name,
                    if label.is_empty() { tool.name.as_str() } else { label.as_str() }
                );
            }
            let _ = writeln!(f, "    end");
        }

        for edge in self.graph.raw_edges() {
            let _ = writeln!(f, "    {} --> {}", edge.source().index(), edge.target().index());
        }

        f
    }
}
