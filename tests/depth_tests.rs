//! `QueryPredicate::depth` bounds how many levels of child collections get
//! installed as live lazy lists versus left untouched at depth zero.

mod common;

use common::{build_manager, TestDetail, TestRecord};
use relstore::predicate::QueryPredicate;
use relstore::Result;

#[test]
fn depth_zero_skips_installing_lazy_children() -> Result<()> {
    let (manager, handle) = build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    let mut record = TestRecord::new("jones", 1);
    record.add_detail(TestDetail::new("smith-1"));
    handle.store(&manager, record_mapping.as_ref(), &mut record)?;

    let predicate = QueryPredicate::for_type("TestRecord").with_depth(0);
    let rows = handle.query(record_mapping.as_ref(), &predicate)?;
    assert_eq!(rows.len(), 1);
    let loaded = rows[0].downcast_ref::<TestRecord>().unwrap();

    // No materializer was ever installed for `details`, so the field is
    // still whatever `create_object` left it: an empty, already-ready list.
    assert!(loaded.details.is_materialized());
    assert_eq!(loaded.details.len()?, 0);
    Ok(())
}

#[test]
fn depth_one_materializes_children_but_not_grandchildren() -> Result<()> {
    let (manager, handle) = build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    let mut record = TestRecord::new("jones", 1);
    record.add_detail(TestDetail::new("smith-1"));
    record.add_detail(TestDetail::new("smith-2"));
    handle.store(&manager, record_mapping.as_ref(), &mut record)?;

    let predicate = QueryPredicate::for_type("TestRecord").with_depth(1);
    let rows = handle.query(record_mapping.as_ref(), &predicate)?;
    let loaded = rows[0].downcast_ref::<TestRecord>().unwrap();

    // TestDetail has no child mappings of its own, so there is nothing
    // further to observe at depth 0 below it beyond the count itself.
    assert_eq!(loaded.details.len()?, 2);
    Ok(())
}
