//! Input sanitization and policy authorization.
//!
//! A request passes through two independent layers before anything runs:
//!
//! 1. **Sanitization** rejects shell metacharacters and characters outside
//!    narrow allow-lists, and canonicalizes the target path.
//! 2. **Authorization** checks the sanitized command, arguments and path
//!    against a closed-world [`Policy`]. Anything not listed is denied.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use command_gateway::policy::{Authorizer, Policy, PolicyEntry, sanitize_command, sanitize_path};
//!
//! let policy = Policy::builder()
//!     .allow("ls", PolicyEntry::new(["-l"], ["/home/user"]))
//!     .build()
//!     .unwrap();
//! let authorizer = Authorizer::new(Arc::new(policy));
//!
//! let command = sanitize_command("ls").unwrap();
//! let path = sanitize_path("/home/user").unwrap();
//! authorizer.authorize(&command, &["-l".to_string()], &path).unwrap();
//! ```

mod authorizer;
mod config;
mod parser;
mod sanitizer;

pub use authorizer::Authorizer;
pub use config::{Policy, PolicyBuilder, PolicyEntry};
pub use parser::ParsedCommand;
pub use sanitizer::{
    DISALLOWED_SEQUENCES, find_disallowed, sanitize_arguments, sanitize_command, sanitize_path,
};
