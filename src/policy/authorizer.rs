//! Semantic allow-list check against a [`Policy`].

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::Policy;
use crate::error::AuthorizationError;

/// Enforces a [`Policy`]. Stateless apart from the shared, read-only policy.
#[derive(Debug, Clone)]
pub struct Authorizer {
    policy: Arc<Policy>,
}

impl Authorizer {
    #[must_use]
    pub fn new(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Checks `command args... path` against the policy.
    ///
    /// `path` is resolved (`.`, `..`, symlinks) before it is compared, and
    /// the comparison is done per path component, so `/homefoo` never falls
    /// under `/home`. A path that cannot be resolved is not allowed.
    ///
    /// # Errors
    ///
    /// - `InvalidCommand` if the name is not a plain identifier
    /// - `CommandNotAllowed` if the command has no policy entry
    /// - `ArgumentNotAllowed` on the first argument not in the entry
    /// - `PathNotAllowed` if no allowed prefix covers `path`
    #[instrument(skip(self, args), fields(args = args.len(), path = %path.display()))]
    pub fn authorize(
        &self,
        command: &str,
        args: &[String],
        path: &Path,
    ) -> Result<(), AuthorizationError> {
        if command.is_empty()
            || !command
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AuthorizationError::InvalidCommand {
                command: command.to_string(),
            });
        }

        let entry = self
            .policy
            .get(command)
            .ok_or_else(|| AuthorizationError::CommandNotAllowed {
                command: command.to_string(),
            })?;

        if let Some(arg) = args.iter().find(|a| !entry.allowed_args.contains(*a)) {
            return Err(AuthorizationError::ArgumentNotAllowed {
                command: command.to_string(),
                argument: arg.clone(),
            });
        }

        if !self.is_path_allowed(path, command) {
            return Err(AuthorizationError::PathNotAllowed {
                command: command.to_string(),
                path: path.to_path_buf(),
            });
        }

        debug!("Authorized");
        Ok(())
    }

    /// Returns whether the resolved `path` falls under one of `command`'s
    /// prefixes.
    ///
    /// Unknown commands and unresolvable paths yield `false`.
    #[must_use]
    pub fn is_path_allowed(&self, path: &Path, command: &str) -> bool {
        let Some(entry) = self.policy.get(command) else {
            return false;
        };
        let resolved = match std::fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Path cannot be resolved");
                return false;
            }
        };
        entry
            .allowed_path_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyEntry;
    use std::path::PathBuf;

    struct Tree {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Tree {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            for sub in ["user/docs", "userfoo", "etc"] {
                std::fs::create_dir_all(root.join(sub)).unwrap();
            }
            Self { _dir: dir, root }
        }

        fn user(&self) -> PathBuf {
            self.root.join("user")
        }

        fn authorizer(&self) -> Authorizer {
            let policy = Policy::builder()
                .allow("ls", PolicyEntry::new(["-l", "-a"], [self.user()]))
                .build()
                .unwrap();
            Authorizer::new(Arc::new(policy))
        }
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_allowed_request() {
        let tree = Tree::new();
        let auth = tree.authorizer();
        auth.authorize("ls", &args(&["-l"]), &tree.user()).unwrap();
        auth.authorize("ls", &args(&["-l", "-a"]), &tree.user().join("docs"))
            .unwrap();
        auth.authorize("ls", &[], &tree.user()).unwrap();
    }

    #[test]
    fn test_unknown_argument() {
        let tree = Tree::new();
        let err = tree
            .authorizer()
            .authorize("ls", &args(&["-l", "-r"]), &tree.user())
            .unwrap_err();
        assert!(matches!(
            err,
            AuthorizationError::ArgumentNotAllowed { ref argument, .. } if argument == "-r"
        ));
    }

    #[test]
    fn test_path_outside_prefix() {
        let tree = Tree::new();
        let err = tree
            .authorizer()
            .authorize("ls", &args(&["-l"]), &tree.root.join("etc"))
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::PathNotAllowed { .. }));
    }

    #[test]
    fn test_prefix_string_trick() {
        let tree = Tree::new();
        let auth = tree.authorizer();
        assert!(!auth.is_path_allowed(&tree.root.join("userfoo"), "ls"));
        assert!(!auth.is_path_allowed(&tree.root, "ls"));
        assert!(auth.is_path_allowed(&tree.user().join("docs"), "ls"));
    }

    #[test]
    fn test_dot_dot_escape_is_resolved() {
        let tree = Tree::new();
        let auth = tree.authorizer();
        let escape = tree.user().join("..").join("etc");

        assert!(!auth.is_path_allowed(&escape, "ls"));
        let err = auth
            .authorize("ls", &args(&["-l"]), &escape)
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::PathNotAllowed { .. }));

        let inside = tree.user().join("docs").join("..");
        assert!(auth.is_path_allowed(&inside, "ls"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_prefix_is_denied() {
        let tree = Tree::new();
        let link = tree.user().join("to-etc");
        std::os::unix::fs::symlink(tree.root.join("etc"), &link).unwrap();
        assert!(!tree.authorizer().is_path_allowed(&link, "ls"));
    }

    #[test]
    fn test_missing_path_is_denied() {
        let tree = Tree::new();
        let auth = tree.authorizer();
        assert!(!auth.is_path_allowed(&tree.user().join("missing"), "ls"));
    }

    #[test]
    fn test_unknown_command_always_denied() {
        let tree = Tree::new();
        let auth = tree.authorizer();
        for command in ["rm", "cat", "LS", "ls2"] {
            for path in [tree.user(), tree.root.clone(), tree.root.join("etc")] {
                let err = auth.authorize(command, &[], &path).unwrap_err();
                assert!(matches!(err, AuthorizationError::CommandNotAllowed { .. }));
            }
            assert!(!auth.is_path_allowed(&tree.user(), command));
        }
    }

    #[test]
    fn test_invalid_command_name() {
        let tree = Tree::new();
        let err = tree
            .authorizer()
            .authorize("ls;", &[], &tree.user())
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::InvalidCommand { .. }));
    }
}
