//! Consecutive `get_storage` calls from the same thread reuse one cached
//! handle rather than opening a fresh connection each time.

use std::sync::Arc;

use relstore::connection::sqlite::SqliteConnectionFactory;
use relstore::dialect::DialectParams;
use relstore::manager::StorageManager;
use relstore::Result;

#[test]
fn repeated_get_storage_returns_the_cached_handle() -> Result<()> {
    let manager = StorageManager::new();
    manager.register("default", Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());

    let first = manager.get_storage(None)?;
    assert_eq!(first.usage_count(), 1);

    let second = manager.get_storage(None)?;
    assert!(first.shares_connection_with(&second));
    assert_eq!(second.usage_count(), 2);

    // A single release only decrements; the handle stays cached and shared
    // (§8 "Handle reuse": "a single release decrements to 1 without
    // closing").
    manager.release_storage(None);
    let third = manager.get_storage(None)?;
    assert!(first.shares_connection_with(&third));
    assert_eq!(third.usage_count(), 2);

    // Bringing the usage count back down to zero evicts the handle: the
    // next acquisition opens a genuinely fresh connection.
    manager.release_storage(None);
    manager.release_storage(None);
    let fourth = manager.get_storage(None)?;
    assert!(!first.shares_connection_with(&fourth));
    assert_eq!(fourth.usage_count(), 1);
    Ok(())
}

#[test]
fn distinct_managers_never_share_a_cached_handle() -> Result<()> {
    let a = StorageManager::new();
    a.register("default", Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());
    let b = StorageManager::new();
    b.register("default", Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());

    let handle_a = a.get_storage(None)?;
    let handle_b = b.get_storage(None)?;
    assert!(!handle_a.shares_connection_with(&handle_b));
    Ok(())
}
