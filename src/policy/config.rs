//! Allow-list policy definition and loading.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::PolicyError;

/// What a single command may be called with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Permitted arguments, matched exactly.
    #[serde(default, rename = "args")]
    pub allowed_args: BTreeSet<String>,

    /// Permitted target directories. A target is allowed when it equals or
    /// lies beneath one of these.
    #[serde(default, rename = "paths")]
    pub allowed_path_prefixes: BTreeSet<PathBuf>,
}

impl PolicyEntry {
    #[must_use]
    pub fn new<A, P>(args: A, paths: P) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<PathBuf>,
    {
        Self {
            allowed_args: args.into_iter().map(Into::into).collect(),
            allowed_path_prefixes: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Non-empty mapping from command name to [`PolicyEntry`].
///
/// Commands absent from the map are denied. Immutable once built.
///
/// # Example
///
/// ```
/// use command_gateway::policy::{Policy, PolicyEntry};
///
/// let policy = Policy::builder()
///     .allow("ls", PolicyEntry::new(["-l", "-a"], ["/home/user"]))
///     .build()
///     .unwrap();
/// assert!(policy.get("ls").is_some());
/// assert!(policy.get("rm").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Policy {
    entries: BTreeMap<String, PolicyEntry>,
}

impl Policy {
    /// Builds a policy from raw entries.
    ///
    /// Relative path prefixes are resolved against the current working
    /// directory, and every prefix is canonicalized when it exists so that
    /// comparisons happen on the same form as sanitized target paths.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Empty` for an empty map, or `PolicyError::Prefix`
    /// if the working directory cannot be determined for a relative prefix.
    #[instrument(skip(entries), fields(commands = entries.len()))]
    pub fn new(entries: BTreeMap<String, PolicyEntry>) -> Result<Self, PolicyError> {
        if entries.is_empty() {
            return Err(PolicyError::Empty);
        }

        let mut resolved = BTreeMap::new();
        for (command, entry) in entries {
            let mut prefixes = BTreeSet::new();
            for prefix in &entry.allowed_path_prefixes {
                prefixes.insert(resolve_prefix(&command, prefix)?);
            }
            debug!(%command, args = entry.allowed_args.len(), paths = prefixes.len(), "Policy entry");
            resolved.insert(
                command,
                PolicyEntry {
                    allowed_args: entry.allowed_args,
                    allowed_path_prefixes: prefixes,
                },
            );
        }

        Ok(Self { entries: resolved })
    }

    #[must_use]
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Parses `{"<command>": {"args": [...], "paths": [...]}}`.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Parse` for malformed JSON and the errors of
    /// [`Policy::new`].
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let entries: BTreeMap<String, PolicyEntry> = serde_json::from_str(json)?;
        Self::new(entries)
    }

    /// Reads and parses a JSON policy file.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Read` if the file cannot be read, otherwise the
    /// errors of [`Policy::from_json`].
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    /// The built-in policy used when no policy file is supplied.
    ///
    /// # Errors
    ///
    /// Fails only if the working directory cannot be determined.
    pub fn default_policy() -> Result<Self, PolicyError> {
        Self::builder()
            .allow("ls", PolicyEntry::new(["-l", "-a", "-h"], ["/"]))
            .allow("cd", PolicyEntry::new(Vec::<String>::new(), ["/"]))
            .allow("npm", PolicyEntry::new(["run", "dev", "install", "test"], ["./"]))
            .allow("python", PolicyEntry::new(["-m", "pytest", "run"], ["./"]))
            .allow("pip", PolicyEntry::new(["install", "list", "freeze"], ["./"]))
            .allow("git", PolicyEntry::new(["status", "pull", "push", "checkout"], ["./"]))
            .build()
    }

    #[must_use]
    pub fn get(&self, command: &str) -> Option<&PolicyEntry> {
        self.entries.get(command)
    }

    /// Allowed command names in sorted order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Incremental construction of a [`Policy`].
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    entries: BTreeMap<String, PolicyEntry>,
}

impl PolicyBuilder {
    /// Adds or replaces the entry for `command`.
    #[must_use]
    pub fn allow(mut self, command: impl Into<String>, entry: PolicyEntry) -> Self {
        self.entries.insert(command.into(), entry);
        self
    }

    /// # Errors
    ///
    /// See [`Policy::new`].
    pub fn build(self) -> Result<Policy, PolicyError> {
        Policy::new(self.entries)
    }
}

fn resolve_prefix(command: &str, prefix: &Path) -> Result<PathBuf, PolicyError> {
    let absolute = if prefix.is_absolute() {
        prefix.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| PolicyError::Prefix {
                command: command.to_string(),
                prefix: prefix.display().to_string(),
                source: e,
            })?
            .join(prefix)
    };
    // A prefix that does not exist yet cannot match any canonical target,
    // but it is not an error to list it.
    Ok(std::fs::canonicalize(&absolute).unwrap_or_else(|_| normalize(&absolute)))
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
