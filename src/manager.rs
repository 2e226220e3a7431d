//! The storage manager (component F, §4.6): a process-wide registry of
//! storage definitions and object mappings, plus a per-thread cache of the
//! live handles opened against them.
//!
//! Mirrors the source's split between "configuration" (definitions,
//! mapping factories — shared across threads under a `RwLock`) and
//! "per-thread working state" (the open connection each thread reuses
//! across calls, since a `StorageHandle` is `!Sync`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::connection::ConnectionFactory;
use crate::dialect::DialectParams;
use crate::error::{Error, Result};
use crate::mapping::{MappingResolver, ObjectMapping};
use crate::predicate::{Criteria, QueryPredicate};
use crate::storage::StorageHandle;
use crate::value::Value;

pub type StorageKey = String;

/// The key `get_storage`/`get_storage_for_type` resolve to when no explicit
/// key is given and no default has been set (§4.6).
pub const DEFAULT_STORAGE_KEY: &str = "default";

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// One configured backend: how to open a connection to it and which
/// dialect knobs apply once open.
struct StorageDefinition {
    factory: Arc<dyn ConnectionFactory>,
    dialect: DialectParams,
}

thread_local! {
    // Keyed by (manager id, storage key) rather than a shared StorageManager
    // pointer, so several manager instances in the same process never
    // collide on the same thread-local slot (§4.6 "supports multiple
    // manager instances").
    static HANDLE_CACHE: RefCell<HashMap<(u64, StorageKey), StorageHandle>> = RefCell::new(HashMap::new());
}

struct ManagerState {
    id: u64,
    definitions: RwLock<HashMap<StorageKey, StorageDefinition>>,
    default_key: RwLock<StorageKey>,
    mapping_factories: RwLock<HashMap<String, Arc<dyn Fn() -> Arc<dyn ObjectMapping> + Send + Sync>>>,
    mapping_cache: RwLock<HashMap<String, Arc<dyn ObjectMapping>>>,
    type_storage: RwLock<HashMap<String, StorageKey>>,
}

/// A cheaply cloned front onto the manager's shared state. Kept as a
/// thin `Arc` wrapper, rather than requiring callers to hold
/// `Arc<StorageManager>` themselves, so a plain `&StorageManager` (e.g.
/// inside `ObjectMapping::store_reference`'s default) can still produce the
/// `Arc<dyn MappingResolver>` a fresh `StorageHandle` needs to resolve
/// mappings on its own.
#[derive(Clone)]
pub struct StorageManager(Arc<ManagerState>);

impl StorageManager {
    pub fn new() -> Self {
        StorageManager(Arc::new(ManagerState {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::SeqCst),
            definitions: RwLock::new(HashMap::new()),
            default_key: RwLock::new(DEFAULT_STORAGE_KEY.to_string()),
            mapping_factories: RwLock::new(HashMap::new()),
            mapping_cache: RwLock::new(HashMap::new()),
            type_storage: RwLock::new(HashMap::new()),
        }))
    }

    /// Registers a storage definition under `key` (§4.6 "register"). The
    /// first definition registered becomes the default unless `set_default`
    /// is called afterwards.
    pub fn register(&self, key: impl Into<StorageKey>, factory: Arc<dyn ConnectionFactory>, dialect: DialectParams) {
        let key = key.into();
        let mut definitions = self.0.definitions.write().expect("storage definitions lock poisoned");
        let is_first = definitions.is_empty();
        definitions.insert(key.clone(), StorageDefinition { factory, dialect });
        drop(definitions);
        if is_first {
            *self.0.default_key.write().expect("default key lock poisoned") = key;
        }
    }

    pub fn set_default(&self, key: impl Into<StorageKey>) {
        *self.0.default_key.write().expect("default key lock poisoned") = key.into();
    }

    /// Binds a type name to a non-default storage definition, used by
    /// `get_storage_for_type` and the reference-before-object cascade
    /// (§4.2 "store_reference", §4.6). Types left unbound resolve to the
    /// manager's default storage.
    pub fn assign_storage(&self, type_name: impl Into<String>, key: impl Into<StorageKey>) {
        self.0
            .type_storage
            .write()
            .expect("type storage lock poisoned")
            .insert(type_name.into(), key.into());
    }

    pub fn register_mapping_factory(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn ObjectMapping> + Send + Sync + 'static,
    ) {
        self.0
            .mapping_factories
            .write()
            .expect("mapping factory lock poisoned")
            .insert(type_name.into(), Arc::new(factory));
    }

    /// Exactly one mapping instance exists per type at a time (Invariant
    /// 1): once built, the mapping is cached and every subsequent caller on
    /// any thread gets the same `Arc`.
    pub fn get_mapping(&self, type_name: &str) -> Result<Arc<dyn ObjectMapping>> {
        if let Some(mapping) = self.0.mapping_cache.read().expect("mapping cache lock poisoned").get(type_name) {
            return Ok(mapping.clone());
        }
        let factory = self
            .0
            .mapping_factories
            .read()
            .expect("mapping factory lock poisoned")
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::mapping(format!("no mapping registered for type {type_name:?}")))?;
        let mapping = factory();
        self.0
            .mapping_cache
            .write()
            .expect("mapping cache lock poisoned")
            .entry(type_name.to_string())
            .or_insert(mapping)
            .clone();
        self.get_mapping(type_name)
    }

    fn resolve_key(&self, key: Option<&str>) -> StorageKey {
        key.map(str::to_string)
            .unwrap_or_else(|| self.0.default_key.read().expect("default key lock poisoned").clone())
    }

    /// Returns this thread's cached handle for `key` (the default storage
    /// if `None`), opening a fresh connection on first use per thread
    /// (§4.6 "new_storage" / per-thread handle cache). Every call — the one
    /// that creates the handle and every subsequent cache hit — increments
    /// its usage count (Invariant 3); `release_storage` must be called a
    /// matching number of times before the connection actually closes.
    pub fn get_storage(&self, key: Option<&str>) -> Result<StorageHandle> {
        let key = self.resolve_key(key);
        let cache_key = (self.0.id, key.clone());
        if let Some(handle) = HANDLE_CACHE.with(|cache| cache.borrow().get(&cache_key).cloned()) {
            handle.mark_used();
            return Ok(handle);
        }
        let handle = self.new_storage(&key)?;
        handle.mark_used();
        HANDLE_CACHE.with(|cache| cache.borrow_mut().insert(cache_key, handle.clone()));
        Ok(handle)
    }

    /// Resolves the storage a given type's objects live in, following
    /// `assign_storage` if set, otherwise the default (§4.6).
    pub fn get_storage_for_type(&self, type_name: &str) -> Result<StorageHandle> {
        let key = self
            .0
            .type_storage
            .read()
            .expect("type storage lock poisoned")
            .get(type_name)
            .cloned();
        self.get_storage(key.as_deref())
    }

    /// Opens a brand-new connection against `key`'s definition, bypassing
    /// the thread-local cache entirely. Most callers want `get_storage`.
    pub fn new_storage(&self, key: &str) -> Result<StorageHandle> {
        let (connection, dialect) = {
            let definitions = self.0.definitions.read().expect("storage definitions lock poisoned");
            let definition = definitions
                .get(key)
                .ok_or_else(|| Error::mapping(format!("no storage definition registered for key {key:?}")))?;
            (definition.factory.open()?, definition.dialect.clone())
        };
        Ok(StorageHandle::new(connection, self.0.clone() as Arc<dyn MappingResolver>, dialect))
    }

    /// Decrements this thread's cached handle for `key`'s usage count; only
    /// once it reaches zero is the handle evicted from the per-thread cache
    /// (§4.6 "release_storage", Invariant 3). The underlying connection
    /// closes once the last `StorageHandle` clone referencing it is dropped.
    /// A key with no cached handle (already released, or never acquired) is
    /// a no-op.
    pub fn release_storage(&self, key: Option<&str>) {
        let key = self.resolve_key(key);
        let cache_key = (self.0.id, key);
        let remaining = HANDLE_CACHE.with(|cache| {
            cache
                .borrow()
                .get(&cache_key)
                .map(|handle| handle.mark_released())
        });
        if remaining == Some(0) {
            HANDLE_CACHE.with(|cache| {
                cache.borrow_mut().remove(&cache_key);
            });
        }
    }

    /// Whether an object of `type_name` with `id` already has a persisted
    /// row, by issuing a `COUNT(*)` through the type's storage (§4.6).
    pub fn is_persistent(&self, type_name: &str, id: &Value) -> Result<bool> {
        let mapping = self.get_mapping(type_name)?;
        let handle = self.get_storage_for_type(type_name)?;
        let predicate = QueryPredicate::for_type(type_name).with_criteria(Criteria::if_attribute(
            mapping.id_attribute().clone(),
            Criteria::equal_to(id.clone()),
        ));
        Ok(handle.size(mapping.as_ref(), &predicate)? > 0)
    }

    /// Clears this manager's definitions, mapping registry and mapping
    /// cache. Per-thread handle caches on other threads are left alone —
    /// they drop their `Rc`-held connections naturally as each thread
    /// exits or calls `release_storage` itself.
    pub fn shutdown(&self) {
        self.0.definitions.write().expect("storage definitions lock poisoned").clear();
        self.0.mapping_factories.write().expect("mapping factory lock poisoned").clear();
        self.0.mapping_cache.write().expect("mapping cache lock poisoned").clear();
        self.0.type_storage.write().expect("type storage lock poisoned").clear();
        let id = self.0.id;
        HANDLE_CACHE.with(|cache| {
            cache.borrow_mut().retain(|(manager_id, _), _| *manager_id != id);
        });
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingResolver for ManagerState {
    fn resolve(&self, type_name: &str) -> Result<Arc<dyn ObjectMapping>> {
        if let Some(mapping) = self.mapping_cache.read().expect("mapping cache lock poisoned").get(type_name) {
            return Ok(mapping.clone());
        }
        let factory = self
            .mapping_factories
            .read()
            .expect("mapping factory lock poisoned")
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::mapping(format!("no mapping registered for type {type_name:?}")))?;
        let mapping = factory();
        self.mapping_cache
            .write()
            .expect("mapping cache lock poisoned")
            .entry(type_name.to_string())
            .or_insert(mapping)
            .clone();
        self.resolve(type_name)
    }
}

impl MappingResolver for StorageManager {
    fn resolve(&self, type_name: &str) -> Result<Arc<dyn ObjectMapping>> {
        self.get_mapping(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_ids_are_distinct() {
        let a = StorageManager::new();
        let b = StorageManager::new();
        assert_ne!(a.0.id, b.0.id);
    }

    #[test]
    fn first_registered_storage_becomes_default() {
        let manager = StorageManager::new();
        assert_eq!(*manager.0.default_key.read().unwrap(), DEFAULT_STORAGE_KEY.to_string());

        #[cfg(feature = "sqlite")]
        {
            use crate::connection::sqlite::SqliteConnectionFactory;
            manager.register("reporting", Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());
            assert_eq!(*manager.0.default_key.read().unwrap(), "reporting".to_string());
        }
    }
}
