use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use crate::core::{Hash32, TargetId};
use crate::fragment::{ToolDef, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId(usize);

impl EnvironmentId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolId(usize);

impl ToolId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An environment every tool with the same variables runs in.
#[derive(Debug, Clone)]
pub struct CanonicalEnvironment {
    /// `Env_<n>`, in order of first appearance.
    pub name: String,
    /// Variables as first declared; their order does not affect identity.
    pub variables: Vec<Variable>,
}

/// A tool invocation shared by every target that asked for it.
#[derive(Debug, Clone)]
pub struct CanonicalTool {
    /// `<local name>_<job>` of the first graph file that declared it.
    pub name: String,
    pub env: EnvironmentId,
    pub def: ToolDef,
    /// Targets served by this tool, in order of first use.
    pub owners: Vec<TargetId>,
}

impl CanonicalTool {
    /// Reporting caption listing every target the tool serves.
    pub fn group_prefix(&self) -> String {
        let mut prefix = String::from("** For ");
        for (i, owner) in self.owners.iter().enumerate() {
            if i > 0 {
                prefix.push_str(" + ");
            }
            prefix.push_str(&owner.to_string());
        }
        prefix
    }
}

/// Identity of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolKey {
    /// `path + " " + params`.
    Invocation(String),
    /// The output path of a shared precompiled header. Compiles of the same
    /// shared PCH collapse even when the rest of their command lines differ.
    SharedPch(String),
}

impl Display for ToolKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKey::Invocation(key) => f.write_str(key),
            ToolKey::SharedPch(pch) => write!(f, "SharedEditorPCH$ {pch}"),
        }
    }
}

/// Recognizes compiles that create a shared precompiled header.
///
/// A tool qualifies when its parameters contain ` /Yc"` followed by
/// ` /Fp"<path>"` and `<path>` contains every configured directory segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPchRule {
    segments: Vec<String>,
}

impl Default for SharedPchRule {
    fn default() -> Self {
        Self::new(["SharedPCHs", "UE4Editor"])
    }
}

impl SharedPchRule {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the shared PCH output path named by `params`, if any.
    pub fn pch_output<'a>(&self, params: &'a str) -> Option<&'a str> {
        if self.segments.is_empty() {
            return None;
        }

        const CREATE: &str = " /Yc\"";
        const OUTPUT: &str = " /Fp\"";

        let yc = params.find(CREATE)?;
        let fp = yc + params[yc..].find(OUTPUT)? + OUTPUT.len();
        let end = fp + params[fp..].find('"')?;
        let pch = &params[fp..end];

        let normalized = pch.replace('/', "\\");
        self.segments
            .iter()
            .all(|segment| normalized.contains(&format!("\\{segment}\\")))
            .then_some(pch)
    }

    pub fn key(&self, tool: &ToolDef) -> ToolKey {
        match self.pch_output(&tool.params) {
            Some(pch) => ToolKey::SharedPch(pch.to_string()),
            None => ToolKey::Invocation(format!("{} {}", tool.path, tool.params)),
        }
    }
}

/// Canonical key of an environment: `name=value` lines, sorted.
pub fn environment_key(variables: &[Variable]) -> String {
    let mut lines: Vec<String> = variables
        .iter()
        .map(|v| format!("{}={}", v.name, v.value))
        .collect();
    lines.sort();

    let mut key = String::new();
    for line in lines {
        key.push_str(&line);
        key.push('\n');
    }
    key
}

/// Deduplicates environments and tools across every merged graph file.
///
/// Entries are only ever added. The first occurrence of a key allocates an
/// id; later occurrences return it.
#[derive(Debug, Default)]
pub struct CanonicalIndex {
    rule: SharedPchRule,
    environments: Vec<CanonicalEnvironment>,
    env_by_key: HashMap<Hash32, EnvironmentId>,
    tools: Vec<CanonicalTool>,
    tool_by_key: HashMap<ToolKey, ToolId>,
}

impl CanonicalIndex {
    pub fn new(rule: SharedPchRule) -> Self {
        Self {
            rule,
            ..Default::default()
        }
    }

    pub fn intern_environment(&mut self, variables: &[Variable]) -> EnvironmentId {
        let hash = Hash32::hash(environment_key(variables));

        if let Some(&id) = self.env_by_key.get(&hash) {
            return id;
        }

        let id = EnvironmentId(self.environments.len());
        self.environments.push(CanonicalEnvironment {
            name: format!("Env_{}", id.0),
            variables: variables.to_vec(),
        });
        self.env_by_key.insert(hash, id);
        id
    }

    /// Interns a tool declared by graph file number `job` on behalf of
    /// `owner`. A tool seen before keeps its environment and name and gains
    /// `owner` as an additional target.
    pub fn intern_tool(
        &mut self,
        env: EnvironmentId,
        def: &ToolDef,
        job: usize,
        owner: &TargetId,
    ) -> ToolId {
        let key = self.rule.key(def);

        if let Some(&id) = self.tool_by_key.get(&key) {
            let tool = &mut self.tools[id.0];
            if !tool.owners.contains(owner) {
                tool.owners.push(owner.clone());
            }
            return id;
        }

        if let ToolKey::SharedPch(_) = key {
            tracing::debug!("Shared PCH detected, keying tool as '{key}'");
        }

        let id = ToolId(self.tools.len());
        self.tools.push(CanonicalTool {
            name: format!("{}_{}", def.name, job),
            env,
            def: def.clone(),
            owners: vec![owner.clone()],
        });
        self.tool_by_key.insert(key, id);
        id
    }

    pub fn environment(&self, id: EnvironmentId) -> &CanonicalEnvironment {
        &self.environments[id.0]
    }

    pub fn tool(&self, id: ToolId) -> &CanonicalTool {
        &self.tools[id.0]
    }

    pub fn environments(&self) -> &[CanonicalEnvironment] {
        &self.environments
    }

    pub fn tools(&self) -> &[CanonicalTool] {
        &self.tools
    }

    /// Tools owned by one environment, in interning order.
    pub fn tools_in(&self, env: EnvironmentId) -> impl Iterator<Item = &CanonicalTool> {
        self.tools.iter().filter(move |tool| tool.env == env)
    }

    pub fn environment_ids(&self) -> impl Iterator<Item = EnvironmentId> {
        (0..self.environments.len()).map(EnvironmentId)
    }
}
