//! The transaction helper (component G, §4.7): groups one or more storage
//! handles into a single bracketed unit, and provides the default
//! `store_reference` implementation `mapping.rs` falls back to.
//!
//! The source triggers a nested transaction through a process-wide
//! transaction manager; here the grouping is explicit and scoped to the
//! caller (§9 "prefer an explicit scoped transaction primitive"), which is
//! also why this module, not `manager.rs`, owns it.

use crate::error::Result;
use crate::manager::StorageManager;
use crate::mapping::ObjectBox;
use crate::storage::StorageHandle;

/// Brackets a group of storage handles in one logical transaction. Handles
/// that already share a connection with one already added are not told to
/// begin twice (`StorageHandle::shares_connection_with`), since a second
/// `begin_transaction` on the same connection would either error or nest
/// incorrectly depending on the driver.
pub struct GroupTransaction {
    handles: Vec<StorageHandle>,
    started: Vec<bool>,
}

impl GroupTransaction {
    pub fn new() -> Self {
        GroupTransaction {
            handles: Vec::new(),
            started: Vec::new(),
        }
    }

    /// Begins a transaction on `handle` unless this group already has one
    /// bracketing the same connection.
    pub fn add(&mut self, handle: StorageHandle) -> Result<()> {
        if self.handles.iter().any(|h| h.shares_connection_with(&handle)) {
            return Ok(());
        }
        handle.begin_transaction()?;
        self.handles.push(handle);
        self.started.push(true);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        for handle in &self.handles {
            handle.commit()?;
        }
        self.started.iter_mut().for_each(|s| *s = false);
        Ok(())
    }

    /// Rolls back every handle this group started. Per §4.7 and §9, a
    /// failure rolling back one handle is logged and swallowed rather than
    /// aborting the rest — the caller already has a primary error to
    /// propagate, and a handle that can't roll back is reported, not
    /// allowed to mask it.
    pub fn rollback(&mut self) {
        for (handle, started) in self.handles.iter().zip(self.started.iter_mut()) {
            if !*started {
                continue;
            }
            if let Err(e) = handle.rollback() {
                log::warn!("rollback failed while unwinding a group transaction: {e}");
            }
            *started = false;
        }
    }
}

impl Default for GroupTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GroupTransaction {
    /// A transaction left with handles still marked `started` at drop time
    /// means neither `commit` nor `rollback` ran (e.g. an early `?` past
    /// `add`); roll back rather than leave it open on the connection.
    fn drop(&mut self) {
        if self.started.iter().any(|s| *s) {
            self.rollback();
        }
    }
}

/// `ObjectMapping::store_reference`'s default (§4.2, §4.7): open a
/// transaction, find the right storage for the referenced type, store,
/// commit; on error roll back and swallow the rollback failure (logged).
pub fn default_store_reference(
    manager: &StorageManager,
    handle: &mut StorageHandle,
    referenced_type: &str,
    referenced: &mut ObjectBox,
) -> Result<()> {
    let referenced_mapping = manager.get_mapping(referenced_type)?;
    let referenced_handle = manager.get_storage_for_type(referenced_type)?;

    let mut transaction = GroupTransaction::new();
    transaction.add(handle.clone())?;
    transaction.add(referenced_handle.clone())?;

    match referenced_handle.store(manager, referenced_mapping.as_ref(), referenced.as_mut()) {
        Ok(()) => transaction.commit(),
        Err(e) => {
            transaction.rollback();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectParams;

    #[cfg(feature = "sqlite")]
    fn open_handle(manager: &StorageManager) -> StorageHandle {
        use crate::connection::sqlite::SqliteConnectionFactory;
        manager.register("default", std::sync::Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());
        manager.get_storage(None).unwrap()
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn adding_the_same_connection_twice_begins_once() {
        let manager = StorageManager::new();
        let handle = open_handle(&manager);
        let mut transaction = GroupTransaction::new();
        transaction.add(handle.clone()).unwrap();
        transaction.add(handle.clone()).unwrap();
        assert_eq!(transaction.handles.len(), 1);
        transaction.commit().unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn drop_without_commit_or_rollback_rolls_back() {
        let manager = StorageManager::new();
        let handle = open_handle(&manager);
        {
            let mut transaction = GroupTransaction::new();
            transaction.add(handle.clone()).unwrap();
            // Early-return without commit/rollback: Drop must unwind.
        }
        assert!(handle.is_valid());
    }
}
