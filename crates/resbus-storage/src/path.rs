//! URL path splitting and command-token detection.
//!
//! Request paths address resources in the tree. A reserved *command token*
//! (`_hooks`, `_forward`) switches the router from resource handling to
//! side-band CRUD; everything from the first command token onward belongs
//! to the command, everything before it addresses a resource.

use thiserror::Error;

/// Reserved path components that select a command instead of a resource.
pub const COMMAND_TOKENS: [&str; 2] = ["_hooks", "_forward"];

/// Errors produced while dissecting a request path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The mount prefix is not a component-wise prefix of the request path.
    #[error("base path {base:?} is not a prefix of {path:?}")]
    PrefixMismatch { base: String, path: String },
}

/// Splits a path into its components.
///
/// Surrounding whitespace is trimmed, at most one leading and one trailing
/// `/` are stripped, and the remainder is split on `/`. An empty path
/// yields the empty vector.
pub fn split_path(path: &str) -> Vec<String> {
    let mut path = path.trim();
    if let Some(rest) = path.strip_prefix('/') {
        path = rest;
    }
    if let Some(rest) = path.strip_suffix('/') {
        path = rest;
    }
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/').map(str::to_string).collect()
}

/// Removes `base` from `path` and separates the remainder into resource
/// components and a trailing command.
///
/// The first component that is a reserved command token starts the command;
/// it and everything after it are returned as the second vector.
pub fn dissect_path(base: &str, path: &str) -> Result<(Vec<String>, Vec<String>), PathError> {
    let base_comps = split_path(base);
    let mut comps = split_path(path);
    if base_comps.len() > comps.len() || comps[..base_comps.len()] != base_comps[..] {
        return Err(PathError::PrefixMismatch {
            base: base.to_string(),
            path: path.to_string(),
        });
    }
    let mut rel: Vec<String> = comps.split_off(base_comps.len());
    if let Some(pos) = rel.iter().position(|c| is_command(c)) {
        let cmds = rel.split_off(pos);
        return Ok((rel, cmds));
    }
    Ok((rel, Vec::new()))
}

/// Checks whether the given name is a reserved command token.
pub fn is_command(name: &str) -> bool {
    COMMAND_TOKENS.contains(&name)
}

/// Checks whether any component is a reserved command token.
pub fn contains_command(components: &[String]) -> bool {
    components.iter().any(|c| is_command(c))
}
