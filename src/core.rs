use std::fmt::{Display, Formatter};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 hash used as a content-based canonical key.
///
/// Environments are interned by the hash of their canonical rendering, so two
/// fragments exported by unrelated targets collapse onto one environment as
/// soon as their variables match, regardless of declaration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Identity of one build target: the `(target, platform, configuration)`
/// triple handed to the compiler front-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    pub name: String,
    pub platform: String,
    pub configuration: String,
}

impl TargetId {
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        configuration: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            configuration: configuration.into(),
        }
    }

    /// Parses the `name:platform:configuration` shorthand used on the command
    /// line.
    pub fn parse_triple(value: &str) -> Option<Self> {
        let mut parts = value.split(':');
        let name = parts.next().filter(|s| !s.is_empty())?;
        let platform = parts.next().filter(|s| !s.is_empty())?;
        let configuration = parts.next().filter(|s| !s.is_empty())?;

        if parts.next().is_some() {
            return None;
        }

        Some(Self::new(name, platform, configuration))
    }
}

/// Renders the reporting caption, e.g. `Game-Win64-Debug`.
impl Display for TargetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.platform, self.configuration)
    }
}

/// A target as requested by the user: its identity plus the optional project
/// file and any extra arguments forwarded verbatim to the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(flatten)]
    pub id: TargetId,
    #[serde(default)]
    pub project: Option<Utf8PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TargetSpec {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            project: None,
            args: Vec::new(),
        }
    }

    pub fn with_project(mut self, project: impl Into<Utf8PathBuf>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}
