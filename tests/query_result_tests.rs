//! `QueryResult` gives a materialized row set absolute/relative cursor
//! positioning, independent of the order `next()` has already been called.

mod common;

use common::TestRecord;
use relstore::predicate::{Criteria, ElementTarget, QueryPredicate};
use relstore::query::PositionMode;
use relstore::Result;

#[test]
fn set_position_supports_both_absolute_and_relative_offsets() -> Result<()> {
    let (manager, handle) = common::build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    handle.store(&manager, record_mapping.as_ref(), &mut TestRecord::new("jones", 1))?;
    handle.store(&manager, record_mapping.as_ref(), &mut TestRecord::new("smith", 1))?;
    handle.store(&manager, record_mapping.as_ref(), &mut TestRecord::new("smith", 2))?;

    let predicate = QueryPredicate::for_type("TestRecord")
        .with_criteria(Criteria::sort_by(ElementTarget::field("id"), true));
    let mut result = handle.query_result(record_mapping.as_ref(), &predicate)?;
    assert_eq!(result.size(), 3);

    let third = result
        .set_position(2, PositionMode::Absolute)
        .next()
        .unwrap()
        .downcast_ref::<TestRecord>()
        .unwrap();
    assert_eq!(third.name, "smith");

    let first = result
        .set_position(-3, PositionMode::Relative)
        .next()
        .unwrap()
        .downcast_ref::<TestRecord>()
        .unwrap();
    assert_eq!(first.name, "jones");
    Ok(())
}
