//! A queried record's `details` list is backed by the child-count column:
//! reading its length never runs the backing query, but reading an element
//! does, exactly once.

mod common;

use common::{build_manager, TestDetail, TestRecord};
use relstore::predicate::QueryPredicate;
use relstore::Result;

#[test]
fn len_reads_the_child_count_column_without_materializing() -> Result<()> {
    let (manager, handle) = build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    let mut record = TestRecord::new("jones", 1);
    record.add_detail(TestDetail::new("smith-1"));
    record.add_detail(TestDetail::new("smith-2"));
    record.add_detail(TestDetail::new("smith-3"));
    handle.store(&manager, record_mapping.as_ref(), &mut record)?;

    let predicate = QueryPredicate::for_type("TestRecord");
    let rows = handle.query(record_mapping.as_ref(), &predicate)?;
    let loaded = rows[0].downcast_ref::<TestRecord>().unwrap();

    assert!(!loaded.details.is_materialized());
    assert_eq!(loaded.details.len()?, 3);
    assert!(!loaded.details.is_materialized());
    assert!(!loaded.details.is_empty()?);
    assert!(!loaded.details.is_materialized());

    let materialized_count = loaded.details.with_items(|items| items.len())?;
    assert_eq!(materialized_count, 3);
    assert!(loaded.details.is_materialized());
    Ok(())
}
