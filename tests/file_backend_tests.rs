//! Exercises the `sqlite` feature's file-backed connection factory —
//! everything else in this suite uses an in-memory database, which never
//! touches `SqliteConnectionFactory::file` or a connection that must survive
//! being dropped and reopened against the same path.

mod common;

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tempfile::tempdir;

use common::TestRecord;
use relstore::connection::sqlite::SqliteConnectionFactory;
use relstore::predicate::{Criteria, QueryPredicate};
use relstore::value::Value;
use relstore::Result;

// Mirrors the teacher's own `Lazy<Mutex<u64>>` counter pattern for handing
// out distinct database file names within one test binary.
static NEXT_DB_ID: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(0));

fn next_db_path(dir: &std::path::Path) -> std::path::PathBuf {
    let mut counter = NEXT_DB_ID.lock().unwrap();
    *counter += 1;
    dir.join(format!("relstore-test-{}.db", *counter))
}

#[test]
fn row_written_to_a_file_backed_database_survives_a_fresh_connection() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = next_db_path(dir.path());

    let (manager, handle) = common::build_manager_with_factory(Arc::new(SqliteConnectionFactory::file(path)))?;
    let record_mapping = manager.get_mapping("TestRecord")?;
    let mut record = TestRecord::new("ada", 42);
    handle.store(&manager, record_mapping.as_ref(), &mut record)?;
    assert!(record.id > 0);
    drop(handle);
    // Drop the manager's cached handle so the next `new_storage` call opens
    // a genuinely fresh `rusqlite::Connection` against the same file rather
    // than reusing the one still cached for this thread.
    manager.release_storage(None);

    let reopened = manager.new_storage("default")?;
    let predicate = QueryPredicate::for_type("TestRecord")
        .with_criteria(Criteria::if_field("name", Criteria::equal_to(Value::String("ada".into()))));
    let rows = reopened.query(record_mapping.as_ref(), &predicate)?;
    assert_eq!(rows.len(), 1);
    let loaded = rows[0].downcast_ref::<TestRecord>().unwrap();
    assert_eq!(loaded.value, 42);
    Ok(())
}
