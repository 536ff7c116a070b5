//! ResourceStore/ResourceHandle trait definitions and the persisted
//! side-band types (hooks, forward).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::path::is_command;

/// Key of the root resource.
pub const ROOT_KEY: &str = "root";

/// Separator between path components inside a resource key.
pub const KEY_SEPARATOR: char = ':';

/// Suffix of the per-resource advisory lock key. Path components may not
/// end with it so resource keys can never collide with lock keys.
pub const LOCK_SUFFIX: &str = "-lock";

/// A webhook registered on a resource.
///
/// `id` is assigned by the engine; `name` and `url` are client-supplied.
/// Unknown JSON keys in a client payload are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

impl Hook {
    /// Parses a client payload as a hook object.
    pub fn parse(data: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(data).map_err(|e| StorageError::InvalidHook {
            message: e.to_string(),
        })
    }

    /// Canonical JSON representation as stored by the backends.
    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string(self).map_err(|e| StorageError::InvalidHook {
            message: e.to_string(),
        })
    }
}

/// A reverse-proxy target attached to a resource.
///
/// An empty URL is indistinguishable from "no forward"; the cleared state
/// is persisted as the JSON object `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    #[serde(default)]
    pub url: String,
}

impl Forward {
    /// Parses a client payload as a forward object.
    pub fn parse(data: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(data).map_err(|e| StorageError::InvalidForward {
            message: e.to_string(),
        })
    }

    /// Canonical JSON representation as stored by the backends.
    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string(self).map_err(|e| StorageError::InvalidForward {
            message: e.to_string(),
        })
    }

    /// True when no forward target is set.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

/// Validates path components for use as a resource path.
///
/// # Errors
/// Returns `StorageError::InvalidPath` if a component is a reserved
/// command token or ends with the lock suffix.
pub fn validate_elts(elts: &[String]) -> StorageResult<()> {
    for e in elts {
        if is_command(e) || e.ends_with(LOCK_SUFFIX) {
            return Err(StorageError::InvalidPath { name: e.clone() });
        }
    }
    Ok(())
}

/// Builds the storage key for a resource path, e.g. `root:a:b`.
pub fn resource_key(elts: &[String]) -> String {
    if elts.is_empty() {
        return ROOT_KEY.to_string();
    }
    let mut key = String::from(ROOT_KEY);
    for e in elts {
        key.push(KEY_SEPARATOR);
        key.push_str(e);
    }
    key
}

/// Extracts the relative name from a fully-qualified child key.
pub fn child_name(key: &str) -> &str {
    key.rsplit(KEY_SEPARATOR).next().unwrap_or(key)
}

/// Abstract store for the resource tree.
///
/// Implementations must be thread-safe (Send + Sync) and swappable at
/// construction time; nothing above this trait knows which backend is in
/// use.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// The per-resource handle type produced by this store.
    type Handle: ResourceHandle;

    /// Checks whether the resource at the given path exists.
    ///
    /// The root (empty path) always exists.
    async fn resource_exists(&self, elts: &[String]) -> StorageResult<bool>;

    /// Creates the resource at the given path.
    ///
    /// Missing intermediate resources are created as collections; the item
    /// flag applies to the last component only. Fails with `AlreadyExists`
    /// if the target resource is already present.
    async fn create_resource(&self, elts: &[String], is_item: bool) -> StorageResult<Self::Handle>;

    /// Returns a handle for the resource at the given path.
    ///
    /// The empty path yields the root handle.
    async fn get_resource(&self, elts: &[String]) -> StorageResult<Self::Handle>;
}

/// Typed view over a single resource.
///
/// A handle carries the resource's path, not a live node reference;
/// operations read and write through the backing store. Operations on one
/// resource are serialized against each other by the backend.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    /// Path components of this resource.
    fn elts(&self) -> &[String];

    /// Last path component (or `root` for the root resource).
    async fn name(&self) -> StorageResult<String>;

    /// Whether this resource is an item (true) or a collection (false).
    async fn is_item(&self) -> StorageResult<bool>;

    /// Returns the content type and payload of an item.
    async fn get_value(&self) -> StorageResult<(String, Vec<u8>)>;

    /// Writes content type and payload. Fails `NotAnItem` on collections.
    async fn set_value(&self, content_type: &str, value: &[u8]) -> StorageResult<()>;

    /// Returns the fully-qualified keys of all children.
    async fn get_children(&self) -> StorageResult<Vec<String>>;

    /// Creates an auto-named item child holding the payload and returns
    /// the assigned name. Fails `NotACollection` on items.
    ///
    /// Names are decimal renderings of a counter that never decrements,
    /// so they are unique even across intervening deletes.
    async fn add_to_collection(&self, content_type: &str, value: &[u8])
        -> StorageResult<String>;

    /// Deletes this resource.
    ///
    /// Fails `HasChildren` for non-leaf resources and `RootProtected` for
    /// the root. Hooks and forward of the deleted resource go with it.
    async fn delete(&self) -> StorageResult<()>;

    /// Creates a hook from a client payload and returns its assigned id.
    async fn add_hook(&self, data: &[u8]) -> StorageResult<String>;

    /// Replaces the hook with the given id from a client payload.
    async fn set_hook(&self, id: &str, data: &[u8]) -> StorageResult<()>;

    /// Returns the hook with the given id.
    async fn get_hook(&self, id: &str) -> StorageResult<Hook>;

    /// Deletes the hook with the given id.
    async fn delete_hook(&self, id: &str) -> StorageResult<()>;

    /// Returns all hook ids on this resource.
    async fn get_hook_ids(&self) -> StorageResult<Vec<String>>;

    /// Returns all hooks on this resource.
    async fn get_hooks(&self) -> StorageResult<Vec<Hook>>;

    /// Returns the forward target; an empty forward when none is set.
    async fn get_forward(&self) -> StorageResult<Forward>;

    /// Parses and stores a forward target from a client payload.
    async fn set_forward(&self, data: &[u8]) -> StorageResult<()>;

    /// Clears the forward target.
    async fn delete_forward(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elts(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resource_key_layout() {
        assert_eq!(resource_key(&[]), "root");
        assert_eq!(resource_key(&elts(&["a"])), "root:a");
        assert_eq!(resource_key(&elts(&["a", "b", "c"])), "root:a:b:c");
    }

    #[test]
    fn test_child_name() {
        assert_eq!(child_name("root:a:b"), "b");
        assert_eq!(child_name("root"), "root");
    }

    #[test]
    fn test_validate_elts_rejects_reserved_names() {
        assert!(validate_elts(&elts(&["a", "b"])).is_ok());
        assert!(matches!(
            validate_elts(&elts(&["a", "_hooks"])),
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            validate_elts(&elts(&["_forward"])),
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            validate_elts(&elts(&["thing-lock"])),
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_hook_parse_ignores_unknown_keys() {
        let hook =
            Hook::parse(br#"{"name":"h","url":"http://x/","extra":42}"#).unwrap();
        assert_eq!(hook.name, "h");
        assert_eq!(hook.url, "http://x/");
        assert_eq!(hook.id, "");
    }

    #[test]
    fn test_hook_parse_rejects_garbage() {
        assert!(matches!(
            Hook::parse(b"not json"),
            Err(StorageError::InvalidHook { .. })
        ));
    }

    #[test]
    fn test_forward_empty_round_trip() {
        // The cleared state is stored as "{}" and parses back to an
        // empty forward.
        let fwd = Forward::parse(b"{}").unwrap();
        assert!(fwd.is_empty());
        let fwd = Forward::parse(br#"{"url":"http://upstream/base"}"#).unwrap();
        assert!(!fwd.is_empty());
        assert_eq!(fwd.to_json().unwrap(), r#"{"url":"http://upstream/base"}"#);
    }
}
