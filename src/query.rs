//! The query executor (component D, §4.4): runs a compiled predicate
//! against a connection, materializes rows into domain objects via
//! `ObjectMapping::create_object`, and installs depth-bounded lazy child
//! collections on each.

use std::time::{Duration, Instant};

use crate::compiler::{compile_count, compile_distinct, compile_position_of_id, compile_select};
use crate::connection::{Connection, Row};
use crate::dialect::DialectParams;
use crate::error::{Error, Result};
use crate::lazy::LazyChildList;
use crate::mapping::{AttributeDescriptor, ChildMapping, MappingResolver, ObjectBox, ObjectMapping};
use crate::predicate::QueryPredicate;
use crate::value::Value;

/// Supplies the closure a freshly loaded object's `LazyChildList` runs on
/// first demand. Implemented by `StorageHandle`, which is the only thing
/// that knows how to reopen a query against the right child mapping using
/// its own connection (§4.4, §4.8).
pub trait ChildMaterializerFactory {
    fn make_materializer(
        &self,
        parent_type: &str,
        child: &ChildMapping,
        parent_id: Value,
        remaining_depth: Option<u32>,
    ) -> Box<dyn FnOnce() -> Result<Vec<ObjectBox>>>;
}

/// Above this, a query is logged at `warn`; above the shorter threshold but
/// below this, at `info`. Chosen to flag pathological queries without
/// spamming logs for every call (§4.7 "long-query logging").
const SLOW_QUERY_WARN: Duration = Duration::from_secs(1);
const SLOW_QUERY_INFO: Duration = Duration::from_millis(100);

fn log_if_slow(sql: &str, elapsed: Duration) {
    if elapsed >= SLOW_QUERY_WARN {
        log::warn!("query took {:?}: {sql}", elapsed);
    } else if elapsed >= SLOW_QUERY_INFO {
        log::info!("query took {:?}: {sql}", elapsed);
    }
}

fn read_attribute_value(mapping: &dyn ObjectMapping, row: &dyn Row, index: usize, attr: &AttributeDescriptor) -> Result<Value> {
    let raw = row.get(index)?;
    mapping.check_attribute_value(attr, raw)
}

/// Reads one row into a freshly created domain object, then installs a
/// depth-bounded `LazyChildList` for each of the mapping's child
/// collections (skipped once `remaining_depth` reaches zero, per the
/// bounded-depth query relation in §6).
fn materialize_row(
    mapping: &dyn ObjectMapping,
    row: &dyn Row,
    as_child: bool,
    remaining_depth: Option<u32>,
    child_factory: Option<&dyn ChildMaterializerFactory>,
) -> Result<ObjectBox> {
    let attributes = mapping.attributes();
    let mut values = Vec::with_capacity(attributes.len());
    for (index, attr) in attributes.iter().enumerate() {
        values.push(read_attribute_value(mapping, row, index, attr)?);
    }
    let mut object = mapping.create_object(values, as_child)?;
    // A row read back from storage is persistent by construction (§4.4
    // "Mark persistent") regardless of what `create_object` itself set.
    mapping.set_persistent(object.as_mut(), true);

    // Trailing `_cc_<table>` columns (one per child mapping, in the same
    // order `compile_select` appended them), read only when the mapping
    // carries them, so each lazy child list can be sized without its own
    // COUNT query (§4.4, §6 "Child-count column").
    let child_counts: Vec<Option<u64>> = if mapping.disable_child_counts() {
        vec![None; mapping.child_mappings().len()]
    } else {
        let base = attributes.len();
        mapping
            .child_mappings()
            .iter()
            .enumerate()
            .map(|(i, _)| row.get(base + i).ok().and_then(|v| v.as_i64()).map(|n| n.max(0) as u64))
            .collect()
    };

    if remaining_depth != Some(0) {
        if let Some(factory) = child_factory {
            let parent_id = mapping.get_value(object.as_ref(), mapping.id_attribute())?;
            let next_depth = remaining_depth.map(|d| d - 1);
            for (child, known_count) in mapping.child_mappings().iter().zip(child_counts) {
                let materializer = factory.make_materializer(mapping.type_name(), child, parent_id.clone(), next_depth);
                let lazy = match known_count {
                    Some(count) => LazyChildList::pending_with_size(count as usize, materializer),
                    None => LazyChildList::pending(materializer),
                };
                mapping.install_lazy_children(object.as_mut(), child, lazy)?;
            }
        }
    }

    Ok(object)
}

/// Runs `predicate` against `mapping`'s table and materializes every
/// matching row (§4.4 "query"). `child_factory` is `None` for callers that
/// only want flat rows with no child collections installed at all.
pub fn execute(
    connection: &mut dyn Connection,
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    dialect: &DialectParams,
    child_factory: Option<&dyn ChildMaterializerFactory>,
) -> Result<Vec<ObjectBox>> {
    let compiled = compile_select(resolver, mapping, predicate, dialect)?;
    let started = Instant::now();
    let mut cursor = connection.query(&compiled)?;
    let mut objects = Vec::new();
    while let Some(row) = cursor.next_row()? {
        objects.push(materialize_row(
            mapping,
            row.as_ref(),
            predicate.is_child_query,
            predicate.depth,
            child_factory,
        )?);
    }
    log_if_slow(&compiled.sql, started.elapsed());
    Ok(objects)
}

/// `SELECT DISTINCT <attr>` over a predicate (§4.4 "get_distinct").
pub fn get_distinct(
    connection: &mut dyn Connection,
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    attr: &AttributeDescriptor,
    dialect: &DialectParams,
) -> Result<Vec<Value>> {
    let compiled = compile_distinct(resolver, mapping, predicate, attr, dialect)?;
    let started = Instant::now();
    let mut cursor = connection.query(&compiled)?;
    let mut values = Vec::new();
    while let Some(row) = cursor.next_row()? {
        values.push(mapping.check_attribute_value(attr, row.get(0)?)?);
    }
    log_if_slow(&compiled.sql, started.elapsed());
    Ok(values)
}

/// `SELECT COUNT(*)` over a predicate (§4.4 "size").
pub fn size(
    connection: &mut dyn Connection,
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    dialect: &DialectParams,
) -> Result<u64> {
    let compiled = compile_count(resolver, mapping, predicate, dialect)?;
    let mut cursor = connection.query(&compiled)?;
    let row = cursor
        .next_row()?
        .ok_or_else(|| Error::storage("COUNT(*) returned no rows"))?;
    Ok(row.get(0)?.as_i64().unwrap_or(0).max(0) as u64)
}

/// The 1-based position `id_value` would occupy in the row order this
/// predicate produces (§4.4 "position_of_id"). Returns `-1` rather than an
/// error when the dialect can't express `row_number() OVER (...)`, matching
/// the "non-fatal on an unsupported driver" contract (§4.7).
pub fn position_of_id(
    connection: &mut dyn Connection,
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    id_value: &Value,
    dialect: &DialectParams,
) -> Result<i64> {
    let Some(mut compiled) = compile_position_of_id(resolver, mapping, predicate, dialect)? else {
        return Ok(-1);
    };
    compiled.compare_values = vec![mapping.map_value(mapping.id_attribute(), id_value)];
    match connection.query(&compiled) {
        Ok(mut cursor) => match cursor.next_row()? {
            Some(row) => Ok(row.get(0)?.as_i64().unwrap_or(-1)),
            None => Ok(-1),
        },
        Err(e) if e.is_unsupported() => Ok(-1),
        Err(e) => Err(e),
    }
}

/// Whether a `QueryResult::set_position` offset is counted from the start
/// of the row set or from the cursor's current position (§3 "Result
/// cursor", §4.4 "Positioning").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Absolute,
    Relative,
}

/// A compiled query's live cursor over its materialized rows (§3 "Query" /
/// "Result cursor"). The connection seam (`connection.rs`) only promises a
/// forward-only `Cursor`, so `execute` already consumes it fully into a
/// `Vec` before a `QueryResult` is built; positioning here is therefore
/// always available; it re-seeks within the in-memory row set rather than
/// depending on a driver-level scrollable cursor.
///
/// §9 notes a placement error in the source's `hasNext` when an offset is
/// present (it assigns the seek, then immediately overwrites it). This
/// follows the evident intent instead: an absolute offset seeks from row
/// zero, a relative one from wherever the cursor currently sits.
pub struct QueryResult {
    rows: Vec<ObjectBox>,
    position: usize,
}

impl QueryResult {
    pub fn new(rows: Vec<ObjectBox>) -> Self {
        QueryResult { rows, position: 0 }
    }

    /// Total row count, independent of cursor position (§8 scenario 5
    /// `q.size()`).
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn has_next(&self) -> bool {
        self.position < self.rows.len()
    }

    /// Moves the cursor to `offset`, interpreted per `mode`, clamped to
    /// `[0, size()]`. Returns `&mut Self` so callers can chain straight into
    /// `next()` as in `set_position(2, Absolute).next()`.
    pub fn set_position(&mut self, offset: i64, mode: PositionMode) -> &mut Self {
        let base = match mode {
            PositionMode::Absolute => 0,
            PositionMode::Relative => self.position as i64,
        };
        let target = base.saturating_add(offset);
        self.position = target.clamp(0, self.rows.len() as i64) as usize;
        self
    }

    /// Returns the row at the current position and advances the cursor,
    /// or `None` once the row set is exhausted.
    pub fn next(&mut self) -> Option<&ObjectBox> {
        let row = self.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }

    pub fn into_rows(self) -> Vec<ObjectBox> {
        self.rows
    }
}
