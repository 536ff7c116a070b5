//! Redis storage implementation.
//!
//! # Key layout
//!
//! For a resource at path `a/b` with key `K = root:a:b`:
//! - Hash at `K` with fields `name`, `item`, `value`, `contentType`,
//!   `nextID`, `nextHookID`, `forward`
//! - Set at `K:_children` holding fully-qualified child keys
//! - Hash at `K:_hooks` mapping hook id to canonical hook JSON
//! - Advisory lock at `K-lock`
//!
//! `item` is stored as `"true"`/`"false"`, counters as decimal strings and
//! the cleared forward as the string `"{}"`.
//!
//! # Locking
//!
//! Every handle operation that touches this resource's state takes the
//! per-resource advisory lock first and releases it on all exit paths.
//! Locks carry a lease (PX) so a crashed holder cannot block siblings
//! forever; release is a compare-and-delete on the lock token. Where a
//! parent and child are both involved the parent lock is taken first, and
//! never while a child lock is held.

use std::time::Duration;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    resource_key, validate_elts, Forward, Hook, ResourceHandle, ResourceStore, KEY_SEPARATOR,
    LOCK_SUFFIX, ROOT_KEY,
};

const NAME_FIELD: &str = "name";
const ITEM_FIELD: &str = "item";
const VALUE_FIELD: &str = "value";
const CONTENT_TYPE_FIELD: &str = "contentType";
const NEXT_ID_FIELD: &str = "nextID";
const NEXT_HOOK_ID_FIELD: &str = "nextHookID";
const FORWARD_FIELD: &str = "forward";

const CHILDREN_SUFFIX: &str = ":_children";
const HOOKS_SUFFIX: &str = ":_hooks";

/// Empty forward sentinel as persisted in the hash.
const FORWARD_CLEARED: &str = "{}";

/// Compare-and-delete release: the lock is only removed when the stored
/// token still belongs to this holder.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Configuration for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Lease on a held per-resource lock, in milliseconds.
    pub lock_lease_ms: u64,
    /// Delay between lock acquisition attempts, in milliseconds.
    pub lock_retry_ms: u64,
    /// Give up acquiring a lock after this long, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            lock_lease_ms: 5_000,
            lock_retry_ms: 20,
            lock_timeout_ms: 5_000,
        }
    }
}

/// A held per-resource advisory lock.
///
/// Must be handed back via `RedisResourceStore::release_lock`; if the
/// holder dies first, the lease expires the lock on the server.
struct ResourceLock {
    lock_key: String,
    token: String,
}

/// Redis implementation of `ResourceStore`.
///
/// Clones share one multiplexed connection; the client's own thread-safety
/// carries concurrent use.
#[derive(Clone)]
pub struct RedisResourceStore {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisResourceStore {
    /// Connects to Redis and seeds the root resource hash if absent.
    pub async fn from_config(config: &RedisConfig) -> StorageResult<Self> {
        let client = ::redis::Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        let store = Self {
            conn,
            config: config.clone(),
        };
        store.seed_root().await?;
        Ok(store)
    }

    /// Makes sure the root hash exists so root reads behave like any
    /// other resource. HSETNX keeps concurrent startups from clobbering
    /// live fields.
    async fn seed_root(&self) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let fields: [(&str, &str); 7] = [
            (NAME_FIELD, ROOT_KEY),
            (ITEM_FIELD, "false"),
            (VALUE_FIELD, ""),
            (CONTENT_TYPE_FIELD, ""),
            (NEXT_ID_FIELD, "0"),
            (NEXT_HOOK_ID_FIELD, "0"),
            (FORWARD_FIELD, FORWARD_CLEARED),
        ];
        let mut pipe = ::redis::pipe();
        for (field, value) in fields {
            pipe.cmd("HSETNX").arg(ROOT_KEY).arg(field).arg(value).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    fn handle(&self, elts: Vec<String>) -> RedisResourceHandle {
        let key = resource_key(&elts);
        RedisResourceHandle {
            store: self.clone(),
            child_key: format!("{key}{CHILDREN_SUFFIX}"),
            hook_key: format!("{key}{HOOKS_SUFFIX}"),
            elts,
            key,
        }
    }

    async fn key_exists(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    /// Acquires the advisory lock for a resource key, waiting up to the
    /// configured timeout.
    async fn acquire_lock(&self, key: &str) -> StorageResult<ResourceLock> {
        let lock_key = format!("{key}{LOCK_SUFFIX}");
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.lock_timeout_ms);
        loop {
            let reply: Option<String> = ::redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.config.lock_lease_ms)
                .query_async(&mut conn)
                .await?;
            if reply.is_some() {
                return Ok(ResourceLock { lock_key, token });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StorageError::LockFailed {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(self.config.lock_retry_ms)).await;
        }
    }

    /// Releases a held lock. A failed release is only logged: the lease
    /// will expire it.
    async fn release_lock(&self, lock: ResourceLock) {
        let mut conn = self.conn.clone();
        let released: Result<i64, _> = ::redis::Script::new(RELEASE_SCRIPT)
            .key(&lock.lock_key)
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await;
        if let Err(err) = released {
            warn!(lock = %lock.lock_key, error = %err, "failed to release resource lock");
        }
    }

    /// Writes the hash for a new resource. Does not touch the parent.
    async fn write_resource_hash(
        &self,
        key: &str,
        name: &str,
        is_item: bool,
        content_type: &str,
        value: &[u8],
    ) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let item = if is_item { "true" } else { "false" };
        ::redis::pipe()
            .atomic()
            .hset(key, NAME_FIELD, name)
            .ignore()
            .hset(key, ITEM_FIELD, item)
            .ignore()
            .hset(key, VALUE_FIELD, value)
            .ignore()
            .hset(key, CONTENT_TYPE_FIELD, content_type)
            .ignore()
            .hset(key, NEXT_ID_FIELD, "0")
            .ignore()
            .hset(key, NEXT_HOOK_ID_FIELD, "0")
            .ignore()
            .hset(key, FORWARD_FIELD, FORWARD_CLEARED)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Creates one resource and registers it with its parent, taking the
    /// parent lock for the child-set insert.
    async fn add_resource(&self, elts: &[String], is_item: bool) -> StorageResult<()> {
        let key = resource_key(elts);
        let name = elts.last().map(String::as_str).unwrap_or(ROOT_KEY);
        self.write_resource_hash(&key, name, is_item, "", b"").await?;

        let parent_key = resource_key(&elts[..elts.len() - 1]);
        let lock = self.acquire_lock(&parent_key).await?;
        let result = async {
            let mut conn = self.conn.clone();
            conn.sadd::<_, _, ()>(format!("{parent_key}{CHILDREN_SUFFIX}"), &key)
                .await?;
            Ok(())
        }
        .await;
        self.release_lock(lock).await;
        result
    }
}

#[async_trait]
impl ResourceStore for RedisResourceStore {
    type Handle = RedisResourceHandle;

    async fn resource_exists(&self, elts: &[String]) -> StorageResult<bool> {
        validate_elts(elts)?;
        if elts.is_empty() {
            return Ok(true);
        }
        self.key_exists(&resource_key(elts)).await
    }

    async fn create_resource(&self, elts: &[String], is_item: bool) -> StorageResult<Self::Handle> {
        validate_elts(elts)?;
        let key = resource_key(elts);
        if elts.is_empty() || self.key_exists(&key).await? {
            return Err(StorageError::AlreadyExists { key });
        }
        // Missing intermediate resources become collections.
        for i in 1..elts.len() {
            if !self.key_exists(&resource_key(&elts[..i])).await? {
                self.add_resource(&elts[..i], false).await?;
            }
        }
        self.add_resource(elts, is_item).await?;
        Ok(self.handle(elts.to_vec()))
    }

    async fn get_resource(&self, elts: &[String]) -> StorageResult<Self::Handle> {
        validate_elts(elts)?;
        if elts.is_empty() {
            return Ok(self.handle(Vec::new()));
        }
        let key = resource_key(elts);
        if !self.key_exists(&key).await? {
            return Err(StorageError::NotFound { key });
        }
        Ok(self.handle(elts.to_vec()))
    }
}

/// Handle over a single resource stored in Redis.
pub struct RedisResourceHandle {
    store: RedisResourceStore,
    elts: Vec<String>,
    key: String,
    child_key: String,
    hook_key: String,
}

impl RedisResourceHandle {
    fn conn(&self) -> ConnectionManager {
        self.store.conn.clone()
    }

    async fn hget_string(&self, field: &str) -> StorageResult<String> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(&self.key, field).await?;
        value.ok_or_else(|| StorageError::NotFound {
            key: self.key.clone(),
        })
    }

    async fn is_item_inner(&self) -> StorageResult<bool> {
        match self.hget_string(ITEM_FIELD).await?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(StorageError::Backend {
                message: format!("invalid item flag {other:?} at {}", self.key),
            }),
        }
    }

    async fn set_value_inner(&self, content_type: &str, value: &[u8]) -> StorageResult<()> {
        if self.is_item_inner().await? {
            let mut conn = self.conn();
            ::redis::pipe()
                .atomic()
                .hset(&self.key, VALUE_FIELD, value)
                .ignore()
                .hset(&self.key, CONTENT_TYPE_FIELD, content_type)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        } else {
            Err(StorageError::NotAnItem {
                key: self.key.clone(),
            })
        }
    }

    async fn get_children_inner(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(&self.child_key).await?)
    }

    async fn add_to_collection_inner(
        &self,
        content_type: &str,
        value: &[u8],
    ) -> StorageResult<String> {
        if self.is_item_inner().await? {
            return Err(StorageError::NotACollection {
                key: self.key.clone(),
            });
        }
        // Atomic increment-and-return; the assigned id is nextVal - 1, so
        // concurrent adds always get distinct names.
        let mut conn = self.conn();
        let next: i64 = conn.hincr(&self.key, NEXT_ID_FIELD, 1).await?;
        let name = (next - 1).to_string();

        let child_key = format!("{}{}{}", self.key, KEY_SEPARATOR, name);
        self.store
            .write_resource_hash(&child_key, &name, true, content_type, value)
            .await?;
        // We already hold this collection's lock, insert directly.
        conn.sadd::<_, _, ()>(&self.child_key, &child_key).await?;
        Ok(name)
    }

    async fn delete_inner(&self) -> StorageResult<()> {
        let children = self.get_children_inner().await?;
        if !children.is_empty() {
            return Err(StorageError::HasChildren {
                key: self.key.clone(),
            });
        }
        let parent_key = resource_key(&self.elts[..self.elts.len() - 1]);
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(format!("{parent_key}{CHILDREN_SUFFIX}"), &self.key)
            .await?;
        conn.del::<_, ()>(vec![
            self.key.clone(),
            self.child_key.clone(),
            self.hook_key.clone(),
        ])
        .await?;
        Ok(())
    }

    async fn set_hook_inner(&self, id: &str, data: &[u8]) -> StorageResult<()> {
        let mut hook = Hook::parse(data)?;
        hook.id = id.to_string();
        let mut conn = self.conn();
        conn.hset::<_, _, _, ()>(&self.hook_key, id, hook.to_json()?)
            .await?;
        Ok(())
    }

    async fn get_hook_inner(&self, id: &str) -> StorageResult<Hook> {
        let mut conn = self.conn();
        let data: Option<String> = conn.hget(&self.hook_key, id).await?;
        match data {
            Some(data) => Hook::parse(data.as_bytes()),
            None => Err(StorageError::HookNotFound { id: id.to_string() }),
        }
    }
}

#[async_trait]
impl ResourceHandle for RedisResourceHandle {
    fn elts(&self) -> &[String] {
        &self.elts
    }

    async fn name(&self) -> StorageResult<String> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.hget_string(NAME_FIELD).await;
        self.store.release_lock(lock).await;
        result
    }

    async fn is_item(&self) -> StorageResult<bool> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.is_item_inner().await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_value(&self) -> StorageResult<(String, Vec<u8>)> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            let content_type: Option<String> = conn.hget(&self.key, CONTENT_TYPE_FIELD).await?;
            let value: Option<Vec<u8>> = conn.hget(&self.key, VALUE_FIELD).await?;
            Ok((content_type.unwrap_or_default(), value.unwrap_or_default()))
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn set_value(&self, content_type: &str, value: &[u8]) -> StorageResult<()> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.set_value_inner(content_type, value).await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_children(&self) -> StorageResult<Vec<String>> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.get_children_inner().await;
        self.store.release_lock(lock).await;
        result
    }

    async fn add_to_collection(
        &self,
        content_type: &str,
        value: &[u8],
    ) -> StorageResult<String> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.add_to_collection_inner(content_type, value).await;
        self.store.release_lock(lock).await;
        result
    }

    async fn delete(&self) -> StorageResult<()> {
        if self.elts.is_empty() {
            return Err(StorageError::RootProtected);
        }
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.delete_inner().await;
        self.store.release_lock(lock).await;
        result
    }

    async fn add_hook(&self, data: &[u8]) -> StorageResult<String> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            let next: i64 = conn.hincr(&self.key, NEXT_HOOK_ID_FIELD, 1).await?;
            let id = (next - 1).to_string();
            self.set_hook_inner(&id, data).await?;
            Ok(id)
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn set_hook(&self, id: &str, data: &[u8]) -> StorageResult<()> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.set_hook_inner(id, data).await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_hook(&self, id: &str) -> StorageResult<Hook> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = self.get_hook_inner(id).await;
        self.store.release_lock(lock).await;
        result
    }

    async fn delete_hook(&self, id: &str) -> StorageResult<()> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            let removed: i64 = conn.hdel(&self.hook_key, id).await?;
            if removed < 1 {
                return Err(StorageError::HookNotFound { id: id.to_string() });
            }
            Ok(())
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_hook_ids(&self) -> StorageResult<Vec<String>> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            Ok(conn.hkeys(&self.hook_key).await?)
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_hooks(&self) -> StorageResult<Vec<Hook>> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            let entries: std::collections::HashMap<String, String> =
                conn.hgetall(&self.hook_key).await?;
            entries
                .into_values()
                .map(|data| Hook::parse(data.as_bytes()))
                .collect()
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn get_forward(&self) -> StorageResult<Forward> {
        let mut conn = self.conn();
        let data: Option<String> = conn.hget(&self.key, FORWARD_FIELD).await?;
        Forward::parse(data.unwrap_or_else(|| FORWARD_CLEARED.to_string()).as_bytes())
    }

    async fn set_forward(&self, data: &[u8]) -> StorageResult<()> {
        let forward = Forward::parse(data)?;
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            conn.hset::<_, _, _, ()>(&self.key, FORWARD_FIELD, forward.to_json()?)
                .await?;
            Ok(())
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }

    async fn delete_forward(&self) -> StorageResult<()> {
        let lock = self.store.acquire_lock(&self.key).await?;
        let result = async {
            let mut conn = self.conn();
            conn.hset::<_, _, _, ()>(&self.key, FORWARD_FIELD, FORWARD_CLEARED)
                .await?;
            Ok(())
        }
        .await;
        self.store.release_lock(lock).await;
        result
    }
}
