//! In-memory storage implementation.
//!
//! Keeps the whole tree in a flat `DashMap` keyed by the same `root:a:b`
//! keys the Redis backend uses, so child keys and relative names behave
//! identically across backends. Single-process only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    resource_key, validate_elts, Forward, Hook, ResourceHandle, ResourceStore, KEY_SEPARATOR,
    ROOT_KEY,
};

/// One node of the in-memory tree.
#[derive(Debug)]
struct MemoryNode {
    name: String,
    is_item: bool,
    value: Vec<u8>,
    content_type: String,
    /// Fully-qualified keys of the children.
    children: HashSet<String>,
    hooks: HashMap<String, Hook>,
    next_id: i64,
    next_hook_id: i64,
    forward: Forward,
}

impl MemoryNode {
    fn new(name: &str, is_item: bool) -> Self {
        Self {
            name: name.to_string(),
            is_item,
            value: Vec::new(),
            content_type: String::new(),
            children: HashSet::new(),
            hooks: HashMap::new(),
            next_id: 0,
            next_hook_id: 0,
            forward: Forward::default(),
        }
    }
}

/// In-memory implementation of `ResourceStore`.
///
/// Uses `DashMap` for thread-safe concurrent access; mutations on a single
/// resource go through one map entry and are serialized by its shard lock.
/// Guards on distinct keys are never held at the same time, parent and
/// child updates happen in separate scopes.
#[derive(Debug)]
pub struct MemoryResourceStore {
    nodes: Arc<DashMap<String, MemoryNode>>,
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResourceStore {
    /// Creates a new in-memory store with an empty root collection.
    pub fn new() -> Self {
        let nodes = Arc::new(DashMap::new());
        nodes.insert(ROOT_KEY.to_string(), MemoryNode::new(ROOT_KEY, false));
        Self { nodes }
    }

    fn handle(&self, elts: Vec<String>) -> MemoryResourceHandle {
        let key = resource_key(&elts);
        MemoryResourceHandle {
            nodes: Arc::clone(&self.nodes),
            elts,
            key,
        }
    }

    /// Inserts a node and registers it in its parent's child set.
    fn insert_node(&self, key: &str, parent_key: &str, name: &str, is_item: bool) {
        self.nodes
            .entry(key.to_string())
            .or_insert_with(|| MemoryNode::new(name, is_item));
        if let Some(mut parent) = self.nodes.get_mut(parent_key) {
            parent.children.insert(key.to_string());
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    type Handle = MemoryResourceHandle;

    async fn resource_exists(&self, elts: &[String]) -> StorageResult<bool> {
        validate_elts(elts)?;
        Ok(self.nodes.contains_key(&resource_key(elts)))
    }

    async fn create_resource(&self, elts: &[String], is_item: bool) -> StorageResult<Self::Handle> {
        validate_elts(elts)?;
        let key = resource_key(elts);
        if elts.is_empty() {
            return Err(StorageError::AlreadyExists { key });
        }
        // Missing intermediate resources become collections.
        for i in 1..elts.len() {
            let prefix_key = resource_key(&elts[..i]);
            if !self.nodes.contains_key(&prefix_key) {
                let parent_key = resource_key(&elts[..i - 1]);
                self.insert_node(&prefix_key, &parent_key, &elts[i - 1], false);
            }
        }
        // The entry API closes the check-then-insert race on the final
        // component.
        use dashmap::mapref::entry::Entry;
        match self.nodes.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::AlreadyExists { key });
            }
            Entry::Vacant(entry) => {
                entry.insert(MemoryNode::new(&elts[elts.len() - 1], is_item));
            }
        }
        let parent_key = resource_key(&elts[..elts.len() - 1]);
        if let Some(mut parent) = self.nodes.get_mut(&parent_key) {
            parent.children.insert(key);
        }
        Ok(self.handle(elts.to_vec()))
    }

    async fn get_resource(&self, elts: &[String]) -> StorageResult<Self::Handle> {
        validate_elts(elts)?;
        let key = resource_key(elts);
        if !self.nodes.contains_key(&key) {
            return Err(StorageError::NotFound { key });
        }
        Ok(self.handle(elts.to_vec()))
    }
}

/// Handle over a single resource in the in-memory tree.
///
/// Carries the resource path, not a node reference; every operation looks
/// the node up again, so a handle held across a delete simply reports
/// `NotFound`.
pub struct MemoryResourceHandle {
    nodes: Arc<DashMap<String, MemoryNode>>,
    elts: Vec<String>,
    key: String,
}

impl MemoryResourceHandle {
    fn not_found(&self) -> StorageError {
        StorageError::NotFound {
            key: self.key.clone(),
        }
    }

    fn with_node<T>(&self, f: impl FnOnce(&MemoryNode) -> T) -> StorageResult<T> {
        self.nodes
            .get(&self.key)
            .map(|node| f(node.value()))
            .ok_or_else(|| self.not_found())
    }

    fn with_node_mut<T>(&self, f: impl FnOnce(&mut MemoryNode) -> T) -> StorageResult<T> {
        self.nodes
            .get_mut(&self.key)
            .map(|mut node| f(node.value_mut()))
            .ok_or_else(|| self.not_found())
    }
}

#[async_trait]
impl ResourceHandle for MemoryResourceHandle {
    fn elts(&self) -> &[String] {
        &self.elts
    }

    async fn name(&self) -> StorageResult<String> {
        self.with_node(|n| n.name.clone())
    }

    async fn is_item(&self) -> StorageResult<bool> {
        self.with_node(|n| n.is_item)
    }

    async fn get_value(&self) -> StorageResult<(String, Vec<u8>)> {
        self.with_node(|n| (n.content_type.clone(), n.value.clone()))
    }

    async fn set_value(&self, content_type: &str, value: &[u8]) -> StorageResult<()> {
        self.with_node_mut(|n| {
            if !n.is_item {
                return Err(StorageError::NotAnItem {
                    key: self.key.clone(),
                });
            }
            n.content_type = content_type.to_string();
            n.value = value.to_vec();
            Ok(())
        })?
    }

    async fn get_children(&self) -> StorageResult<Vec<String>> {
        self.with_node(|n| n.children.iter().cloned().collect())
    }

    async fn add_to_collection(
        &self,
        content_type: &str,
        value: &[u8],
    ) -> StorageResult<String> {
        // Allocate the name under the collection's entry guard so that
        // concurrent calls get distinct, strictly increasing ids.
        let name = self.with_node_mut(|n| {
            if n.is_item {
                return Err(StorageError::NotACollection {
                    key: self.key.clone(),
                });
            }
            let name = n.next_id.to_string();
            n.next_id += 1;
            Ok(name)
        })??;

        let child_key = format!("{}{}{}", self.key, KEY_SEPARATOR, name);
        let mut child = MemoryNode::new(&name, true);
        child.content_type = content_type.to_string();
        child.value = value.to_vec();
        self.nodes.insert(child_key.clone(), child);
        self.with_node_mut(|n| {
            n.children.insert(child_key);
        })?;
        Ok(name)
    }

    async fn delete(&self) -> StorageResult<()> {
        if self.elts.is_empty() {
            return Err(StorageError::RootProtected);
        }
        self.with_node(|n| {
            if !n.children.is_empty() {
                return Err(StorageError::HasChildren {
                    key: self.key.clone(),
                });
            }
            Ok(())
        })??;
        let parent_key = resource_key(&self.elts[..self.elts.len() - 1]);
        if let Some(mut parent) = self.nodes.get_mut(&parent_key) {
            parent.children.remove(&self.key);
        }
        self.nodes
            .remove(&self.key)
            .map(|_| ())
            .ok_or_else(|| self.not_found())
    }

    async fn add_hook(&self, data: &[u8]) -> StorageResult<String> {
        let mut hook = Hook::parse(data)?;
        self.with_node_mut(|n| {
            let id = n.next_hook_id.to_string();
            n.next_hook_id += 1;
            hook.id = id.clone();
            n.hooks.insert(id.clone(), hook);
            id
        })
    }

    async fn set_hook(&self, id: &str, data: &[u8]) -> StorageResult<()> {
        let mut hook = Hook::parse(data)?;
        hook.id = id.to_string();
        self.with_node_mut(|n| {
            n.hooks.insert(id.to_string(), hook);
        })
    }

    async fn get_hook(&self, id: &str) -> StorageResult<Hook> {
        self.with_node(|n| n.hooks.get(id).cloned())?
            .ok_or_else(|| StorageError::HookNotFound { id: id.to_string() })
    }

    async fn delete_hook(&self, id: &str) -> StorageResult<()> {
        self.with_node_mut(|n| n.hooks.remove(id))?
            .map(|_| ())
            .ok_or_else(|| StorageError::HookNotFound { id: id.to_string() })
    }

    async fn get_hook_ids(&self) -> StorageResult<Vec<String>> {
        self.with_node(|n| n.hooks.keys().cloned().collect())
    }

    async fn get_hooks(&self) -> StorageResult<Vec<Hook>> {
        self.with_node(|n| n.hooks.values().cloned().collect())
    }

    async fn get_forward(&self) -> StorageResult<Forward> {
        self.with_node(|n| n.forward.clone())
    }

    async fn set_forward(&self, data: &[u8]) -> StorageResult<()> {
        let forward = Forward::parse(data)?;
        self.with_node_mut(|n| {
            n.forward = forward;
        })
    }

    async fn delete_forward(&self) -> StorageResult<()> {
        self.with_node_mut(|n| {
            n.forward = Forward::default();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elts(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let store = MemoryResourceStore::new();
        let path = elts(&["path", "res"]);
        let created = store.create_resource(&path, true).await.unwrap();
        assert!(created.is_item().await.unwrap());

        let fetched = store.get_resource(&path).await.unwrap();
        assert!(fetched.is_item().await.unwrap());
        assert_eq!(fetched.name().await.unwrap(), "res");
        assert_eq!(fetched.elts(), path.as_slice());

        // Intermediate resources are created as collections.
        let parent = store.get_resource(&elts(&["path"])).await.unwrap();
        assert!(!parent.is_item().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryResourceStore::new();
        let path = elts(&["a", "b"]);
        store.create_resource(&path, true).await.unwrap();
        assert!(matches!(
            store.create_resource(&path, true).await,
            Err(StorageError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_reserved_names_rejected() {
        let store = MemoryResourceStore::new();
        assert!(matches!(
            store.create_resource(&elts(&["a", "_hooks"]), false).await,
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.resource_exists(&elts(&["x-lock"])).await,
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_root_always_exists() {
        let store = MemoryResourceStore::new();
        assert!(store.resource_exists(&[]).await.unwrap());
        let root = store.get_resource(&[]).await.unwrap();
        assert!(!root.is_item().await.unwrap());
        assert!(matches!(root.delete().await, Err(StorageError::RootProtected)));
    }

    #[tokio::test]
    async fn test_value_round_trip() {
        let store = MemoryResourceStore::new();
        let res = store.create_resource(&elts(&["item"]), true).await.unwrap();
        res.set_value("text/plain", b"some data").await.unwrap();
        let (ct, value) = res.get_value().await.unwrap();
        assert_eq!(ct, "text/plain");
        assert_eq!(value, b"some data");
    }

    #[tokio::test]
    async fn test_set_value_on_collection_fails() {
        let store = MemoryResourceStore::new();
        let coll = store.create_resource(&elts(&["coll"]), false).await.unwrap();
        assert!(matches!(
            coll.set_value("text/plain", b"x").await,
            Err(StorageError::NotAnItem { .. })
        ));
    }

    // Child naming: "0", "1", "2", ... and names are never reused even
    // after deletes in between.
    #[tokio::test]
    async fn test_collection_naming_monotonic() {
        let store = MemoryResourceStore::new();
        let coll = store.create_resource(&elts(&["coll"]), false).await.unwrap();
        assert_eq!(coll.add_to_collection("", b"a").await.unwrap(), "0");
        assert_eq!(coll.add_to_collection("", b"b").await.unwrap(), "1");

        let child = store.get_resource(&elts(&["coll", "1"])).await.unwrap();
        child.delete().await.unwrap();

        assert_eq!(coll.add_to_collection("", b"c").await.unwrap(), "2");
        let mut names: Vec<String> = coll
            .get_children()
            .await
            .unwrap()
            .iter()
            .map(|k| crate::traits::child_name(k).to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn test_add_to_item_fails() {
        let store = MemoryResourceStore::new();
        let item = store.create_resource(&elts(&["item"]), true).await.unwrap();
        assert!(matches!(
            item.add_to_collection("", b"x").await,
            Err(StorageError::NotACollection { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_leaf_only() {
        let store = MemoryResourceStore::new();
        store
            .create_resource(&elts(&["path", "res"]), true)
            .await
            .unwrap();
        let parent = store.get_resource(&elts(&["path"])).await.unwrap();
        assert!(matches!(
            parent.delete().await,
            Err(StorageError::HasChildren { .. })
        ));
        // Still reachable after the failed delete.
        assert!(store.resource_exists(&elts(&["path", "res"])).await.unwrap());

        let child = store.get_resource(&elts(&["path", "res"])).await.unwrap();
        child.delete().await.unwrap();
        parent.delete().await.unwrap();
        assert!(!store.resource_exists(&elts(&["path"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_hook_crud() {
        let store = MemoryResourceStore::new();
        let res = store.create_resource(&elts(&["x"]), true).await.unwrap();

        let id = res
            .add_hook(br#"{"name":"h","url":"http://observer/"}"#)
            .await
            .unwrap();
        assert_eq!(id, "0");

        let hook = res.get_hook(&id).await.unwrap();
        assert_eq!(hook.name, "h");
        // The assigned id wins over anything in the payload.
        assert_eq!(hook.id, "0");

        res.set_hook(&id, br#"{"id":"999","name":"h2","url":"http://other/"}"#)
            .await
            .unwrap();
        let hook = res.get_hook(&id).await.unwrap();
        assert_eq!(hook.id, "0");
        assert_eq!(hook.name, "h2");

        assert_eq!(res.get_hook_ids().await.unwrap(), vec!["0"]);
        res.delete_hook(&id).await.unwrap();
        assert!(matches!(
            res.get_hook(&id).await,
            Err(StorageError::HookNotFound { .. })
        ));
        // Hook ids keep increasing after deletes.
        let id = res
            .add_hook(br#"{"name":"h3","url":"http://observer/"}"#)
            .await
            .unwrap();
        assert_eq!(id, "1");
    }

    #[tokio::test]
    async fn test_forward_crud() {
        let store = MemoryResourceStore::new();
        let res = store.create_resource(&elts(&["x"]), false).await.unwrap();

        assert!(res.get_forward().await.unwrap().is_empty());
        res.set_forward(br#"{"url":"http://upstream/base"}"#)
            .await
            .unwrap();
        assert_eq!(res.get_forward().await.unwrap().url, "http://upstream/base");
        res.delete_forward().await.unwrap();
        assert!(res.get_forward().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_get_distinct_names() {
        let store = Arc::new(MemoryResourceStore::new());
        store.create_resource(&elts(&["coll"]), false).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let coll = store.get_resource(&elts(&["coll"])).await.unwrap();
                coll.add_to_collection("", b"x").await.unwrap()
            }));
        }
        let mut names = Vec::new();
        for t in tasks {
            names.push(t.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 16);
    }
}
