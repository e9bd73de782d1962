//! Syntactic rejection of dangerous input.
//!
//! These checks run before anything interprets the input. They never try to
//! make input safe; they only refuse it.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::error::SanitizationError;

/// Shell metacharacters and control sequences, longest first so that `>>`
/// is reported as itself rather than as `>`.
pub const DISALLOWED_SEQUENCES: &[&str] = &[
    "$(", "${", ">>", "[[", "]]", ";", "&", "|", "`", ">", "<", "\n", "\r", "\0",
];

#[allow(clippy::unwrap_used)]
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[allow(clippy::unwrap_used)]
static ARGUMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").unwrap());

/// Returns the first disallowed sequence found in `value`, if any.
#[must_use]
pub fn find_disallowed(value: &str) -> Option<&'static str> {
    DISALLOWED_SEQUENCES
        .iter()
        .copied()
        .find(|seq| value.contains(seq))
}

fn check_sequences(field: &'static str, value: &str) -> Result<(), SanitizationError> {
    match find_disallowed(value) {
        Some(pattern) => {
            let pattern = pattern.escape_debug().to_string();
            warn!(field, %pattern, "Rejected disallowed sequence");
            Err(SanitizationError::DisallowedPattern { field, pattern })
        }
        None => Ok(()),
    }
}

/// Validates a bare command name.
///
/// # Errors
///
/// Fails if the name contains a shell metacharacter or anything outside
/// `[A-Za-z0-9_-]`.
pub fn sanitize_command(raw: &str) -> Result<String, SanitizationError> {
    check_sequences("command", raw)?;
    if !COMMAND_RE.is_match(raw) {
        return Err(SanitizationError::InvalidCharacters {
            field: "command",
            value: raw.to_string(),
        });
    }
    Ok(raw.to_string())
}

/// Validates every argument; one bad argument rejects the whole batch.
///
/// # Errors
///
/// Fails on the first argument containing a metacharacter or anything
/// outside `[A-Za-z0-9_./-]`.
pub fn sanitize_arguments<S: AsRef<str>>(args: &[S]) -> Result<Vec<String>, SanitizationError> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            check_sequences("argument", arg)?;
            if !ARGUMENT_RE.is_match(arg) {
                return Err(SanitizationError::InvalidCharacters {
                    field: "argument",
                    value: arg.to_string(),
                });
            }
            Ok(arg.to_string())
        })
        .collect()
}

/// Resolves `raw` to its canonical absolute form and validates the result.
///
/// The raw string is checked, then resolved (`.`, `..` and symlinks), then
/// the resolved string is checked again so that nothing hidden behind a
/// symlink or a `..` segment reaches the authorizer unchecked.
///
/// # Errors
///
/// Fails if either form contains a metacharacter, or if the path does not
/// resolve.
#[instrument(level = "debug")]
pub fn sanitize_path(raw: &str) -> Result<PathBuf, SanitizationError> {
    check_sequences("path", raw)?;

    let resolved = std::fs::canonicalize(raw).map_err(|e| SanitizationError::InvalidPath {
        path: raw.to_string(),
        source: e,
    })?;

    check_sequences("path", &resolved.to_string_lossy())?;
    debug!(resolved = %resolved.display(), "Path resolved");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_accepts_plain_names() {
        assert_eq!(sanitize_command("ls").unwrap(), "ls");
        assert_eq!(sanitize_command("git-lfs").unwrap(), "git-lfs");
        assert_eq!(sanitize_command("python_3").unwrap(), "python_3");
    }

    #[test]
    fn test_command_rejects_chaining_before_anything_else() {
        let err = sanitize_command("ls; rm -rf /").unwrap_err();
        assert!(matches!(
            err,
            SanitizationError::DisallowedPattern { field: "command", .. }
        ));
    }

    #[test]
    fn test_command_rejects_embedded_arguments() {
        assert!(matches!(
            sanitize_command("ls -l"),
            Err(SanitizationError::InvalidCharacters { .. })
        ));
        assert!(sanitize_command("").is_err());
        assert!(sanitize_command("/bin/ls").is_err());
    }

    #[test]
    fn test_every_metacharacter_rejected_everywhere() {
        for seq in [";", "&", "|", "`", "$(", "${", ">", ">>", "<", "[[", "]]"] {
            let raw = format!("a{seq}b");
            assert!(sanitize_command(&raw).is_err(), "command {raw:?}");
            assert!(sanitize_arguments(&[raw.as_str()]).is_err(), "argument {raw:?}");
            assert!(
                matches!(
                    sanitize_path(&format!("/tmp/{raw}")),
                    Err(SanitizationError::DisallowedPattern { .. })
                ),
                "path {raw:?}"
            );
        }
    }

    #[test]
    fn test_longest_sequence_reported() {
        assert_eq!(find_disallowed("a >> b"), Some(">>"));
        assert_eq!(find_disallowed("$(id)"), Some("$("));
        assert_eq!(find_disallowed("plain"), None);
    }

    #[test]
    fn test_arguments_batch_fails_as_a_whole() {
        assert_eq!(
            sanitize_arguments(&["-l", "./src", "file_1.txt"]).unwrap(),
            vec!["-l", "./src", "file_1.txt"]
        );
        assert!(sanitize_arguments(&["-l", "a b"]).is_err());
        assert!(sanitize_arguments(&["-l", "--name=x"]).is_err());
    }

    #[test]
    fn test_path_resolves_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();

        let raw = format!("{}/a/../a/.", dir.path().display());
        let resolved = sanitize_path(&raw).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(&nested).unwrap());
    }

    #[test]
    fn test_path_missing_is_invalid() {
        assert!(matches!(
            sanitize_path("/definitely/not/here"),
            Err(SanitizationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_path_checked_after_symlink_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x;y");
        std::fs::create_dir(&target).unwrap();
        let link = dir.path().join("innocent");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = sanitize_path(&link.to_string_lossy()).unwrap_err();
        assert!(matches!(err, SanitizationError::DisallowedPattern { field: "path", .. }));
    }
}
