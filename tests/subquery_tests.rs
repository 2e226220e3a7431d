//! `has_child`/`refers_to` sub-query compilation and the `similar_to`
//! fuzzy-match function, both exercised end to end against the SQLite
//! backend rather than against the generated SQL text.

mod common;

use common::{build_manager, TestDetail, TestRecord};
use relstore::predicate::{Criteria, QueryPredicate};
use relstore::value::Value;
use relstore::Result;
use std::collections::BTreeSet;

#[test]
fn has_child_narrows_to_parents_with_a_matching_detail() -> Result<()> {
    let (manager, handle) = build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    let mut with_match = TestRecord::new("alpha", 1);
    with_match.add_detail(TestDetail::new("wanted"));
    handle.store(&manager, record_mapping.as_ref(), &mut with_match)?;

    let mut without_match = TestRecord::new("beta", 2);
    without_match.add_detail(TestDetail::new("other"));
    handle.store(&manager, record_mapping.as_ref(), &mut without_match)?;

    let criteria = Criteria::if_field(
        "details",
        Criteria::has_child(
            "TestDetail",
            Criteria::if_field("name", Criteria::equal_to(Value::String("wanted".into()))),
        ),
    );
    let predicate = QueryPredicate::for_type("TestRecord").with_criteria(criteria);
    let rows = handle.query(record_mapping.as_ref(), &predicate)?;
    let ids: BTreeSet<i64> = rows.iter().map(|r| r.downcast_ref::<TestRecord>().unwrap().id).collect();

    assert_eq!(ids, BTreeSet::from([with_match.id]));
    Ok(())
}

#[test]
fn similar_to_matches_same_sounding_names() -> Result<()> {
    let (manager, handle) = build_manager()?;
    let record_mapping = manager.get_mapping("TestRecord")?;

    let mut jones = TestRecord::new("Jones", 1);
    handle.store(&manager, record_mapping.as_ref(), &mut jones)?;
    let mut smith = TestRecord::new("Smith", 2);
    handle.store(&manager, record_mapping.as_ref(), &mut smith)?;

    let criteria = Criteria::if_field("name", Criteria::similar_to("jones"));
    let predicate = QueryPredicate::for_type("TestRecord").with_criteria(criteria);
    let rows = handle.query(record_mapping.as_ref(), &predicate)?;
    let ids: BTreeSet<i64> = rows.iter().map(|r| r.downcast_ref::<TestRecord>().unwrap().id).collect();

    assert_eq!(ids, BTreeSet::from([jones.id]));
    Ok(())
}
