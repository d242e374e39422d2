//! Extra environment variables for the launched child.

use std::collections::BTreeMap;
use tracing::warn;

/// Resolved extra environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraEnv {
    /// Variables to set in the child, applied after any environment clearing
    pub vars: BTreeMap<String, String>,

    /// Bare names that were requested but not present in the current environment
    pub missing: Vec<String>,
}

/// Resolve `KEY=VALUE` and bare `KEY` entries against the current environment.
pub fn resolve_extra_env<S: AsRef<str>>(entries: &[S]) -> ExtraEnv {
    resolve_extra_env_with(entries, |key| std::env::var(key).ok())
}

/// Resolve entries using `lookup` for bare names.
///
/// `KEY=VALUE` is split at the first `=`, so values may contain `=` themselves.
/// A bare name absent from the environment is reported and left out.
pub fn resolve_extra_env_with<S, F>(entries: &[S], lookup: F) -> ExtraEnv
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = ExtraEnv::default();

    for entry in entries {
        let entry = entry.as_ref();
        if let Some((key, value)) = entry.split_once('=') {
            resolved.vars.insert(key.to_string(), value.to_string());
        } else {
            match lookup(entry) {
                Some(value) => {
                    resolved.vars.insert(entry.to_string(), value);
                }
                None => {
                    warn!("Requested env var {} does not exist in environment", entry);
                    resolved.missing.push(entry.to_string());
                }
            }
        }
    }

    resolved
}
