//! Masking of sensitive argument values before they are persisted.

use std::collections::BTreeSet;

/// Replacement written in place of a sensitive value.
pub const MASK: &str = "[MASKED]";

/// Flags whose following token is treated as a secret. Matched exactly.
pub const DEFAULT_SENSITIVE_FLAGS: &[&str] =
    &["-p", "--password", "PASSWORD", "TOKEN", "KEY", "SECRET"];

/// Replaces the token following any sensitive flag with [`MASK`].
///
/// The flag itself is kept so history still shows that a secret was passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masker {
    flags: BTreeSet<String>,
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FLAGS.iter().copied())
    }
}

impl Masker {
    #[must_use]
    pub fn new<I>(flags: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_sensitive(&self, token: &str) -> bool {
        self.flags.contains(token)
    }

    /// Returns a masked copy of `args`. Applying it twice changes nothing.
    #[must_use]
    pub fn mask(&self, args: &[String]) -> Vec<String> {
        let mut masked = Vec::with_capacity(args.len());
        let mut hide_next = false;
        for arg in args {
            if hide_next {
                masked.push(MASK.to_string());
                hide_next = false;
            } else {
                hide_next = self.is_sensitive(arg);
                masked.push(arg.clone());
            }
        }
        masked
    }
}
