use std::collections::HashMap;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::core::TargetId;
use crate::error::MergeError;
use crate::fragment::{Fragment, GraphPart};
use crate::graph::index::{CanonicalIndex, EnvironmentId, SharedPchRule, ToolId};
use crate::graph::{MergeStats, UnifiedGraph};

/// A task renamed into the global namespace.
#[derive(Debug, Clone)]
pub struct GlobalTask {
    /// `<local name>_<job>` of the graph file that created it.
    pub name: String,
    pub tool: ToolId,
    /// Environment of the tool; decides which project the task lands in.
    pub env: EnvironmentId,
    pub source_file: String,
    pub caption: Option<String>,
    pub working_dir: String,
    pub skip_if_project_failed: bool,
    /// The target whose graph file created the task.
    pub owner: TargetId,
}

/// Folds fragments into one graph, in the order they are added.
///
/// Edges point from a dependency to its dependent. Every edge is added from a
/// node that already exists to the node being created, so the graph is a DAG
/// and node order is a valid execution order.
#[derive(Debug)]
pub struct Merger {
    index: CanonicalIndex,
    graph: Graph<GlobalTask, ()>,
    by_key: HashMap<(ToolId, String), NodeIndex>,
    /// Tasks created by the last fragment that created any.
    previous: Vec<NodeIndex>,
    sources: Vec<Utf8PathBuf>,
    job: usize,
    stats: MergeStats,
}

impl Merger {
    pub fn new(rule: SharedPchRule) -> Self {
        Self {
            index: CanonicalIndex::new(rule),
            graph: Graph::new(),
            by_key: HashMap::new(),
            previous: Vec::new(),
            sources: Vec::new(),
            job: 0,
            stats: MergeStats::default(),
        }
    }

    /// Merges every graph file of `fragment`.
    ///
    /// New tasks implicitly depend on the tasks created by the previous
    /// fragment and on those created by earlier graph files of this one.
    pub fn add_fragment(&mut self, fragment: &Fragment) -> Result<(), MergeError> {
        let implicit = self.previous.clone();
        let mut created = Vec::new();

        for part in &fragment.parts {
            let fresh = self.add_part(&fragment.target.id, part, &implicit, &created)?;
            created.extend(fresh);
        }

        debug!(
            "Merged {}: {} new task(s) from {} graph file(s)",
            fragment.caption,
            created.len(),
            fragment.parts.len()
        );

        if !created.is_empty() {
            self.previous = created;
        }
        self.stats.fragments += 1;
        Ok(())
    }

    fn add_part(
        &mut self,
        owner: &TargetId,
        part: &GraphPart,
        implicit: &[NodeIndex],
        earlier: &[NodeIndex],
    ) -> Result<Vec<NodeIndex>, MergeError> {
        let job = self.job;
        self.job += 1;
        self.stats.parts += 1;
        self.sources.push(part.source.clone());

        let env = self.index.intern_environment(&part.variables);

        let mut tools: HashMap<&str, ToolId> = HashMap::new();
        for def in &part.tools {
            if tools.contains_key(def.name.as_str()) {
                return Err(MergeError::DuplicateName {
                    target: owner.clone(),
                    kind: "tool",
                    name: def.name.clone(),
                    file: part.source.clone(),
                });
            }
            let id = self.index.intern_tool(env, def, job, owner);
            tools.insert(def.name.as_str(), id);
        }

        let mut local: HashMap<&str, NodeIndex> = HashMap::new();
        let mut fresh = Vec::new();

        for task in &part.tasks {
            if local.contains_key(task.name.as_str()) {
                return Err(MergeError::DuplicateName {
                    target: owner.clone(),
                    kind: "task",
                    name: task.name.clone(),
                    file: part.source.clone(),
                });
            }

            let tool = *tools
                .get(task.tool.as_str())
                .ok_or_else(|| MergeError::UnknownTool {
                    target: owner.clone(),
                    task: task.name.clone(),
                    tool: task.tool.clone(),
                    file: part.source.clone(),
                })?;

            let mut deps = Vec::with_capacity(task.depends_on.len());
            for dep in &task.depends_on {
                let node = local
                    .get(dep.as_str())
                    .ok_or_else(|| MergeError::UnresolvedDependency {
                        target: owner.clone(),
                        task: task.name.clone(),
                        dependency: dep.clone(),
                        file: part.source.clone(),
                    })?;
                deps.push(*node);
            }

            let key = (tool, task.source_file.clone());
            if let Some(&existing) = self.by_key.get(&key) {
                self.stats.duplicate_tasks += 1;
                local.insert(task.name.as_str(), existing);
                continue;
            }

            let node = self.graph.add_node(GlobalTask {
                name: format!("{}_{}", task.name, job),
                tool,
                env: self.index.tool(tool).env,
                source_file: task.source_file.clone(),
                caption: task.caption.clone(),
                working_dir: task.working_dir.clone(),
                skip_if_project_failed: task.skip_if_project_failed,
                owner: owner.clone(),
            });

            for &dep in deps.iter().chain(implicit).chain(earlier) {
                self.graph.update_edge(dep, node, ());
            }

            self.by_key.insert(key, node);
            local.insert(task.name.as_str(), node);
            fresh.push(node);
        }

        Ok(fresh)
    }

    pub fn finish(mut self) -> UnifiedGraph {
        self.stats.environments = self.index.environments().len();
        self.stats.tools = self.index.tools().len();
        self.stats.tasks = self.graph.node_count();

        UnifiedGraph {
            index: self.index,
            graph: self.graph,
            sources: self.sources,
            stats: self.stats,
        }
    }
}

/// Merges `fragments` in order.
pub fn merge(fragments: &[Fragment], rule: SharedPchRule) -> Result<UnifiedGraph, MergeError> {
    let mut merger = Merger::new(rule);
    for fragment in fragments {
        merger.add_fragment(fragment)?;
    }
    Ok(merger.finish())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::core::TargetSpec;
    use crate::fragment::{TaskDef, ToolDef, Variable};
    use crate::manifest::Manifest;
    use crate::testing::compile_part;

    fn fragment(name: &str, platform: &str, parts: Vec<GraphPart>) -> Fragment {
        let target = TargetSpec::new(TargetId::new(name, platform, "Debug"));
        Fragment::new(target, parts, Manifest::default())
    }

    fn names(graph: &UnifiedGraph) -> Vec<String> {
        graph.tasks().map(|(_, t)| t.name.clone()).collect()
    }

    #[test]
    fn test_scenario_shared_environment_and_tool() {
        let x = fragment("X", "Win64", vec![compile_part("X", "x.cpp", "PATH=/vs")]);
        let y = fragment("Y", "Win64", vec![compile_part("Y", "y.cpp", "PATH=/vs")]);
        let z = fragment("Z", "Mac", vec![compile_part("Z", "z.cpp", "PATH=/xcode")]);

        // X and Y compile with the identical command line.
        let shared = |mut f: Fragment| {
            f.parts[0].tools[0].params = "/c /nologo".into();
            f
        };
        let graph = merge(&[shared(x), shared(y), z], SharedPchRule::default()).unwrap();

        assert_eq!(graph.index.environments().len(), 2);

        let compile = graph.index.tools().iter().position(|t| t.def.params == "/c /nologo").unwrap();
        let users: Vec<_> = graph
            .tasks()
            .filter(|(_, t)| t.tool.index() == compile)
            .map(|(_, t)| t.source_file.clone())
            .collect();
        assert_eq!(users, vec!["x.cpp", "y.cpp"]);

        let z_tasks: Vec<_> = graph.tasks().filter(|(_, t)| t.owner.name == "Z").collect();
        assert_eq!(z_tasks.len(), 2);
        assert!(z_tasks.iter().all(|(_, t)| graph.index.environment(t.env).name == "Env_1"));
    }

    #[test]
    fn test_duplicate_task_collapses_and_dependents_follow() {
        let mut a = compile_part("Game", "a.cpp", "");
        let mut b = compile_part("Game", "a.cpp", "");
        // Same compile; distinct link steps that depend on it.
        a.tools[1].params = "/out:A.exe".into();
        b.tools[1].params = "/out:B.exe".into();
        a.source = "a.xge.xml".into();
        b.source = "b.xge.xml".into();

        let graph = merge(
            &[fragment("A", "Win64", vec![a]), fragment("B", "Win64", vec![b])],
            SharedPchRule::default(),
        )
        .unwrap();

        assert_eq!(graph.stats.tasks, 3);
        assert_eq!(graph.stats.duplicate_tasks, 1);
        assert_eq!(names(&graph), vec!["Action0_0", "Action1_0", "Action1_1"]);

        let (b_link, _) = graph.tasks().find(|(_, t)| t.name == "Action1_1").unwrap();
        assert!(graph.dependencies(b_link).contains(&"Action0_0"));
    }

    #[test]
    fn test_unresolved_dependency_is_fatal() {
        let mut part = compile_part("Game", "a.cpp", "");
        part.tasks[1].depends_on = vec!["Missing".into()];

        let err = merge(&[fragment("Game", "Win64", vec![part])], SharedPchRule::default()).unwrap_err();
        assert!(matches!(
            err,
            MergeError::UnresolvedDependency { ref dependency, ref task, .. } if dependency == "Missing" && task == "Action1"
        ));
    }

    #[test]
    fn test_forward_reference_is_unresolved() {
        let mut part = compile_part("Game", "a.cpp", "");
        part.tasks.reverse();

        let err = merge(&[fragment("Game", "Win64", vec![part])], SharedPchRule::default()).unwrap_err();
        assert!(matches!(err, MergeError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_repeated_names_in_one_file_are_fatal() {
        let mut part = compile_part("Game", "a.cpp", "");
        part.tools.push(ToolDef::new("Tool0", "cl.exe", "/c b.cpp"));

        let err = merge(&[fragment("Game", "Win64", vec![part])], SharedPchRule::default()).unwrap_err();
        assert!(matches!(
            err,
            MergeError::DuplicateName { kind: "tool", ref name, .. } if name == "Tool0"
        ));

        let mut part = compile_part("Game", "a.cpp", "");
        part.tasks.insert(1, TaskDef::new("Action0", "Tool1", ""));

        let err = merge(&[fragment("Game", "Win64", vec![part])], SharedPchRule::default()).unwrap_err();
        assert!(matches!(
            err,
            MergeError::DuplicateName { kind: "task", ref name, .. } if name == "Action0"
        ));
    }

    #[test]
    fn test_same_local_names_across_files_stay_distinct() {
        let fragments = vec![fragment(
            "A",
            "Win64",
            vec![compile_part("A", "a.cpp", ""), compile_part("A", "b.cpp", "")],
        )];
        let graph = merge(&fragments, SharedPchRule::default()).unwrap();

        let all: HashSet<_> = graph.tasks().map(|(_, t)| t.name.clone()).collect();
        assert_eq!(all.len(), graph.stats.tasks);
    }

    #[test]
    fn test_unknown_tool() {
        let mut part = compile_part("Game", "a.cpp", "");
        part.tasks[0].tool = "Nope".into();

        let err = merge(&[fragment("Game", "Win64", vec![part])], SharedPchRule::default()).unwrap_err();
        assert!(matches!(err, MergeError::UnknownTool { .. }));
    }

    #[test]
    fn test_every_dependency_exists() {
        let fragments = vec![
            fragment("A", "Win64", vec![compile_part("A", "a.cpp", "X=1"), compile_part("A", "b.cpp", "X=1")]),
            fragment("B", "Win64", vec![compile_part("B", "a.cpp", "X=1")]),
            fragment("C", "Mac", vec![compile_part("C", "c.cpp", "X=2")]),
        ];
        let graph = merge(&fragments, SharedPchRule::default()).unwrap();

        let all: HashSet<_> = graph.tasks().map(|(_, t)| t.name.as_str()).collect();
        for (node, _) in graph.tasks() {
            for dep in graph.dependencies(node) {
                assert!(all.contains(dep), "dangling {dep}");
            }
        }
    }

    #[test]
    fn test_implicit_dependencies_follow_fragment_order() {
        let fragments = vec![
            fragment("A", "Win64", vec![compile_part("A", "a.cpp", "")]),
            fragment("B", "Win64", vec![compile_part("B", "b.cpp", "")]),
        ];
        let graph = merge(&fragments, SharedPchRule::default()).unwrap();

        let (b_compile, _) = graph.tasks().find(|(_, t)| t.name == "Action0_1").unwrap();
        assert_eq!(graph.dependencies(b_compile), vec!["Action0_0", "Action1_0"]);
    }

    #[test]
    fn test_later_parts_wait_for_earlier_parts() {
        let fragments = vec![fragment(
            "A",
            "Win64",
            vec![compile_part("A", "a.cpp", ""), compile_part("A", "b.cpp", "")],
        )];
        let graph = merge(&fragments, SharedPchRule::default()).unwrap();

        let (second, _) = graph.tasks().find(|(_, t)| t.name == "Action0_1").unwrap();
        assert_eq!(graph.dependencies(second), vec!["Action0_0", "Action1_0"]);

        let (first, _) = graph.tasks().find(|(_, t)| t.name == "Action1_0").unwrap();
        assert_eq!(graph.dependencies(first), vec!["Action0_0"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let build = || {
            let mut part = GraphPart::default();
            part.variables = vec![Variable::new("B", "2"), Variable::new("A", "1")];
            part.tools = vec![ToolDef::new("T0", "cc", "-c a.c"), ToolDef::new("T1", "cc", "-c b.c")];
            part.tasks = vec![
                TaskDef::new("A0", "T0", "a.c"),
                TaskDef::new("A1", "T1", "b.c").depends_on(["A0"]),
            ];
            vec![fragment("A", "Linux", vec![part.clone()]), fragment("B", "Linux", vec![part])]
        };

        let first = merge(&build(), SharedPchRule::default()).unwrap();
        let second = merge(&build(), SharedPchRule::default()).unwrap();
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_empty_merge() {
        let graph = merge(&[], SharedPchRule::default()).unwrap();
        assert!(graph.is_empty());

        let graph = merge(&[fragment("A", "Win64", vec![])], SharedPchRule::default()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.stats.fragments, 1);
    }
}
