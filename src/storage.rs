//! The storage handle (component E, §4.6): one live connection plus the
//! mapping resolver needed to follow child/reference predicates. Not
//! `Sync` by design — a handle is meant to live on one thread at a time,
//! the same way `rusqlite::Connection` is `Send` but not `Sync` (§7
//! "Concurrency & Resource Model").

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::compiler::{compile_create_table, compile_delete, compile_insert, compile_update, quoted_table_name, CompiledQuery};
use crate::connection::Connection;
use crate::dialect::DialectParams;
use crate::error::{Error, Result};
use crate::mapping::{ChildMapping, MappingResolver, ObjectBox, ObjectMapping};
use crate::predicate::QueryPredicate;
use crate::query::ChildMaterializerFactory;
use crate::value::Value;

/// Process-wide kill switch mirroring the source's `disable_delete`
/// configuration knob (§4.6): when set, every handle refuses `delete`
/// regardless of the mapping's own `is_delete_allowed`.
static DELETE_DISABLED: AtomicBool = AtomicBool::new(false);

pub fn set_delete_disabled(disabled: bool) {
    DELETE_DISABLED.store(disabled, Ordering::SeqCst);
}

pub fn is_delete_disabled() -> bool {
    DELETE_DISABLED.load(Ordering::SeqCst)
}

/// A handle to one open connection. Cheap to clone — clones share the same
/// underlying connection via `Rc`, matching the per-thread handle cache
/// `manager.rs` keeps (one live handle per `(manager, storage definition)`
/// pair, reused across calls on the same thread).
///
/// Only the connection itself sits behind a `RefCell`: it's the one field a
/// query actually mutates. `resolver` and `dialect` are read-only for the
/// life of the handle, so they're kept as plain cloneable fields instead of
/// sharing that cell — a child materializer built while a query holds the
/// connection borrowed (§4.4 "lazy children") only ever reads `resolver`,
/// never the connection, so it can't collide with that borrow.
#[derive(Clone)]
pub struct StorageHandle {
    connection: Rc<RefCell<Box<dyn Connection>>>,
    resolver: Arc<dyn MappingResolver>,
    dialect: DialectParams,
    usage_count: Rc<Cell<u64>>,
}

impl StorageHandle {
    pub fn new(connection: Box<dyn Connection>, resolver: Arc<dyn MappingResolver>, dialect: DialectParams) -> Self {
        StorageHandle {
            connection: Rc::new(RefCell::new(connection)),
            resolver,
            dialect,
            usage_count: Rc::new(Cell::new(0)),
        }
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.get()
    }

    pub(crate) fn mark_used(&self) {
        self.usage_count.set(self.usage_count.get() + 1);
    }

    /// Decrements the usage count and returns the new value (§4.6
    /// "release_storage"). Never underflows past zero.
    pub(crate) fn mark_released(&self) -> u64 {
        let next = self.usage_count.get().saturating_sub(1);
        self.usage_count.set(next);
        next
    }

    /// Whether `self` and `other` share the same underlying connection,
    /// used by the group-transaction helper to avoid nesting a second
    /// `begin_transaction` on a connection it's already bracketing.
    pub fn shares_connection_with(&self, other: &StorageHandle) -> bool {
        Rc::ptr_eq(&self.connection, &other.connection)
    }

    pub fn is_valid(&self) -> bool {
        self.connection.borrow().is_valid()
    }

    /// Releases the handle back to whatever pool it came from. A handle
    /// backed by a single connection has no extra bookkeeping to do here;
    /// `manager.rs` decides whether to keep it cached or drop it.
    pub fn release(&self) {}

    pub fn begin_transaction(&self) -> Result<()> {
        self.connection.borrow_mut().begin_transaction()
    }

    pub fn commit(&self) -> Result<()> {
        self.connection.borrow_mut().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.connection.borrow_mut().rollback()
    }

    pub fn query(&self, mapping: &dyn ObjectMapping, predicate: &QueryPredicate) -> Result<Vec<ObjectBox>> {
        let mut connection = self.connection.borrow_mut();
        crate::query::execute(
            connection.as_mut(),
            self.resolver.as_ref(),
            mapping,
            predicate,
            &self.dialect,
            Some(self),
        )
    }

    /// Like `query`, but wraps the materialized rows in a `QueryResult` so
    /// callers get absolute/relative positioning over the row set (§3
    /// "Result cursor", §8 scenario 5) instead of a plain `Vec`.
    pub fn query_result(&self, mapping: &dyn ObjectMapping, predicate: &QueryPredicate) -> Result<crate::query::QueryResult> {
        self.query(mapping, predicate).map(crate::query::QueryResult::new)
    }

    pub fn get_distinct(
        &self,
        mapping: &dyn ObjectMapping,
        predicate: &QueryPredicate,
        attr: &crate::mapping::AttributeDescriptor,
    ) -> Result<Vec<Value>> {
        let mut connection = self.connection.borrow_mut();
        crate::query::get_distinct(connection.as_mut(), self.resolver.as_ref(), mapping, predicate, attr, &self.dialect)
    }

    pub fn size(&self, mapping: &dyn ObjectMapping, predicate: &QueryPredicate) -> Result<u64> {
        let mut connection = self.connection.borrow_mut();
        crate::query::size(connection.as_mut(), self.resolver.as_ref(), mapping, predicate, &self.dialect)
    }

    pub fn position_of_id(
        &self,
        mapping: &dyn ObjectMapping,
        predicate: &QueryPredicate,
        id_value: &Value,
    ) -> Result<i64> {
        let mut connection = self.connection.borrow_mut();
        crate::query::position_of_id(connection.as_mut(), self.resolver.as_ref(), mapping, predicate, id_value, &self.dialect)
    }

    /// Creates the table for `mapping`, then recursively initializes storage
    /// for its child mappings and non-hierarchy reference attributes (§4.5).
    /// Idempotent: `CREATE TABLE IF NOT EXISTS` makes calling this twice for
    /// the same type observably identical to calling it once.
    pub fn init_object_storage(&self, mapping: &dyn ObjectMapping) -> Result<()> {
        let mut visited = std::collections::HashSet::new();
        self.init_object_storage_rec(mapping, &mut visited)
    }

    fn init_object_storage_rec(
        &self,
        mapping: &dyn ObjectMapping,
        visited: &mut std::collections::HashSet<String>,
    ) -> Result<()> {
        if !visited.insert(mapping.type_name().to_string()) {
            return Ok(());
        }
        let statements = compile_create_table(mapping, &self.dialect);
        {
            let mut connection = self.connection.borrow_mut();
            connection.execute_ddl(&statements.create_table)?;
            for index_sql in &statements.indexes {
                connection.execute_ddl(index_sql)?;
            }
        }

        for child in mapping.child_mappings() {
            self.init_object_storage_rec(child.mapping.as_ref(), visited)?;
        }

        for attr in mapping.attributes() {
            // Never recurse through self-references or back into the parent
            // type (§4.5) — a `parent` attribute's table is the one that
            // initiated this call and is already being created.
            if attr.reference && !attr.parent {
                if let Some(referenced_type) = &attr.references_type {
                    if referenced_type != mapping.type_name() {
                        if let Ok(referenced_mapping) = self.resolver.resolve(referenced_type) {
                            self.init_object_storage_rec(referenced_mapping.as_ref(), visited)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Probes for an existing table by running a trivial, harmless select
    /// against it; any driver error (most commonly "no such table") is
    /// treated as "not initialized" rather than propagated.
    pub fn has_object_storage(&self, mapping: &dyn ObjectMapping) -> Result<bool> {
        let table = quoted_table_name(mapping, &self.dialect);
        let probe = CompiledQuery {
            sql: format!("SELECT 1 FROM {table} LIMIT 1"),
            compare_attributes: Vec::new(),
            compare_values: Vec::new(),
            order_by: String::new(),
        };
        Ok(self.connection.borrow_mut().query(&probe).is_ok())
    }

    pub fn remove_object_storage(&self, mapping: &dyn ObjectMapping) -> Result<()> {
        let table = quoted_table_name(mapping, &self.dialect);
        self.connection.borrow_mut().execute_ddl(&format!("DROP TABLE IF EXISTS {table}"))
    }

    /// Writes one object: insert if not yet persistent, update otherwise
    /// (skipping the update entirely when the mapping reports the object
    /// unmodified, Invariant 6). Children are stored after the parent row
    /// exists so their foreign-key back-reference can be set from the
    /// parent's (possibly just-generated) id (§4.2 "store").
    pub fn store(&self, manager: &crate::manager::StorageManager, mapping: &dyn ObjectMapping, object: &mut dyn Any) -> Result<()> {
        if mapping.is_storing(object) {
            // Reentrant store (e.g. a reference cycle) is a no-op rather
            // than an infinite recursion (Invariant 5).
            return Ok(());
        }
        mapping.set_storing(object, true);
        let result = self.store_inner(manager, mapping, object);
        mapping.set_storing(object, false);
        result
    }

    fn store_inner(&self, manager: &crate::manager::StorageManager, mapping: &dyn ObjectMapping, object: &mut dyn Any) -> Result<()> {
        self.store_embedded_references(manager, mapping, object)?;

        // Fetched once, up front, so the just-written row's child-count
        // columns (§6) reflect the collection sizes actually stored below —
        // a lazy list materializes here, before it is counted, never after
        // (§9 "Child-count maintenance").
        let mut children_by_mapping = Vec::with_capacity(mapping.child_mappings().len());
        for child in mapping.child_mappings() {
            children_by_mapping.push((child, mapping.get_children(object, child)?));
        }

        let dialect = self.dialect.clone();
        if mapping.is_persistent(object) {
            if !matches!(mapping.is_modified(object), Some(false)) {
                let template = compile_update(mapping, &dialect);
                let values = self.bind_write_values(mapping, object, &template, &children_by_mapping)?;
                self.connection.borrow_mut().execute(&template, &values)?;
                mapping.clear_modified(object);
            }
        } else {
            let template = compile_insert(mapping, &dialect);
            let values = self.bind_write_values(mapping, object, &template, &children_by_mapping)?;
            let generated = self.connection.borrow_mut().execute_insert(&template, &values)?;
            if mapping.id_attribute().autogenerated {
                if let Some(raw_id) = generated {
                    let id_attr = mapping.id_attribute().clone();
                    let id_value = mapping.check_attribute_value(&id_attr, raw_id)?;
                    mapping.set_value(object, &id_attr, id_value)?;
                }
            }
            mapping.set_persistent(object, true);
        }

        let parent_id = mapping.get_value(object, mapping.id_attribute())?;
        for (child, children) in children_by_mapping {
            for mut child_object in children {
                self.set_parent_backreference(child, mapping.type_name(), &parent_id, child_object.as_mut())?;
                self.store(manager, child.mapping.as_ref(), child_object.as_mut())?;
            }
        }
        Ok(())
    }

    /// Binds one `WriteTemplate`'s placeholders in its documented order:
    /// attribute values, then one child-count integer per `child_counts`
    /// entry, then the id value last if the template carries one.
    fn bind_write_values(
        &self,
        mapping: &dyn ObjectMapping,
        object: &dyn Any,
        template: &crate::compiler::WriteTemplate,
        children_by_mapping: &[(&ChildMapping, Vec<crate::mapping::ObjectBox>)],
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(template.attributes.len() + template.child_counts.len() + 1);
        for attr in &template.attributes {
            let raw = mapping.get_value(object, attr)?;
            values.push(mapping.map_value(attr, &raw));
        }
        for child_mapping in &template.child_counts {
            let count = children_by_mapping
                .iter()
                .find(|(child, _)| Arc::ptr_eq(&child.mapping, child_mapping))
                .map(|(_, children)| children.len())
                .unwrap_or(0);
            values.push(Value::Int64(count as i64));
        }
        if let Some(id_attr) = &template.id_attribute {
            let raw = mapping.get_value(object, id_attr)?;
            values.push(mapping.map_value(id_attr, &raw));
        }
        Ok(values)
    }

    fn set_parent_backreference(
        &self,
        child: &ChildMapping,
        parent_type: &str,
        parent_id: &Value,
        child_object: &mut dyn Any,
    ) -> Result<()> {
        if let Some(parent_attr) = child.mapping.parent_attribute(parent_type) {
            let parent_attr = parent_attr.clone();
            child.mapping.set_value(child_object, &parent_attr, parent_id.clone())?;
        }
        Ok(())
    }

    fn store_embedded_references(
        &self,
        manager: &crate::manager::StorageManager,
        mapping: &dyn ObjectMapping,
        object: &mut dyn Any,
    ) -> Result<()> {
        for attr in mapping.attributes() {
            if !attr.reference || attr.parent {
                continue;
            }
            if let Some((referenced_type, mut referenced)) = mapping.take_embedded_reference(object, attr) {
                let mut handle = self.clone();
                mapping.store_reference(manager, &mut handle, &referenced_type, &mut referenced)?;
            }
        }
        Ok(())
    }

    /// Deletes one object, gated by both the mapping's own
    /// `is_delete_allowed` and the process-wide disable switch (§4.6).
    pub fn delete(&self, mapping: &dyn ObjectMapping, object: &mut dyn Any) -> Result<()> {
        // §7 "Delete pathway": both gates raise a storage error before any
        // SQL is issued, not a mapping/unsupported error — a caller catching
        // only `Error::Storage` must still see a disabled or disallowed
        // delete as a failure to delete.
        if is_delete_disabled() {
            return Err(Error::storage("delete is globally disabled"));
        }
        if !mapping.is_delete_allowed() {
            return Err(Error::storage(format!("{} does not allow delete", mapping.type_name())));
        }
        let dialect = self.dialect.clone();
        let template = compile_delete(mapping, &dialect);
        let id_value = mapping.get_value(object, mapping.id_attribute())?;
        let bound_id = mapping.map_value(mapping.id_attribute(), &id_value);
        self.connection.borrow_mut().execute(&template, &[bound_id])?;
        mapping.set_persistent(object, false);
        Ok(())
    }
}

impl ChildMaterializerFactory for StorageHandle {
    fn make_materializer(
        &self,
        parent_type: &str,
        child: &ChildMapping,
        parent_id: Value,
        remaining_depth: Option<u32>,
    ) -> Box<dyn FnOnce() -> Result<Vec<ObjectBox>>> {
        let handle = self.clone();
        let child = child.clone();
        let parent_type = parent_type.to_string();
        let resolver = self.resolver.clone();
        Box::new(move || {
            let parent_attr = child.mapping.parent_attribute(&parent_type).ok_or_else(|| {
                Error::mapping(format!(
                    "{} has no parent attribute for {}",
                    child.mapping.type_name(),
                    parent_type
                ))
            })?;
            let mut criteria = crate::predicate::Criteria::if_attribute(
                parent_attr.clone(),
                crate::predicate::Criteria::equal_to(parent_id.clone()),
            );
            // If the child type is itself self-hierarchical (e.g. a tree
            // node whose own children are the same type) under a *different*
            // attribute than the one used to reach it from `parent_type`,
            // restrict to rows with no self-parent so descendants already
            // reachable via another row's own child list aren't duplicated
            // here (§4.4 "lazy children").
            if let Some(self_attr) = child.mapping.parent_attribute(child.mapping.type_name()) {
                if self_attr.field_name != parent_attr.field_name {
                    let self_attr = self_attr.clone();
                    criteria = criteria.and(crate::predicate::Criteria::if_attribute(
                        self_attr,
                        crate::predicate::Criteria::equal_to(Value::Null),
                    ));
                }
            }
            let mut predicate = QueryPredicate::for_type(child.mapping.type_name())
                .with_criteria(criteria)
                .as_child_query();
            predicate.depth = remaining_depth;
            let mut children = handle.query(child.mapping.as_ref(), &predicate)?;
            // Back-fill parent references the read path didn't already set
            // from the row itself (§4.4 "lazy children").
            if let Ok(parent_mapping) = resolver.resolve(&parent_type) {
                parent_mapping.init_children(&parent_id, &mut children, &child)?;
            }
            Ok(children)
        })
    }
}
