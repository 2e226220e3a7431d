//! A generic object-persistence framework: a composable SQL predicate
//! algebra, a reflection-like storage mapping layer, and a lazy
//! hierarchical query executor over a pluggable connection factory.
//!
//! The core is four tightly coupled subsystems:
//!
//! - [`predicate`] — the criteria tree applications build queries from.
//! - [`mapping`] — how a domain type projects onto a table.
//! - [`compiler`] — lowers a criteria tree + mapping into parameterized SQL.
//! - [`query`] (executor) and [`lazy`] (lazy child lists) — runs a compiled
//!   query and reconstructs an object graph, deferring child sub-queries.
//!
//! [`storage`] wraps one live connection with commit/rollback and
//! insert/update/delete dispatch; [`manager`] is the process-wide registry
//! of storage definitions and per-thread handle cache that hands them out;
//! [`transaction`] groups handles for the default `store_reference` policy.
//! [`connection`] is the seam the core depends on instead of a concrete
//! driver — a `rusqlite` adapter lives behind the default `sqlite` feature.
//!
//! ```no_run
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! use relstore::connection::sqlite::SqliteConnectionFactory;
//! use relstore::dialect::DialectParams;
//! use relstore::mapping::{AttributeDescriptor, ObjectBox, ObjectMapping};
//! use relstore::predicate::{Criteria, QueryPredicate};
//! use relstore::value::{Datatype, Value};
//! use relstore::manager::StorageManager;
//! use relstore::Result;
//!
//! struct Person {
//!     id: i64,
//!     name: String,
//!     persistent: bool,
//! }
//!
//! struct PersonMapping {
//!     attributes: Vec<AttributeDescriptor>,
//! }
//!
//! impl ObjectMapping for PersonMapping {
//!     fn type_name(&self) -> &str { "Person" }
//!     fn attributes(&self) -> &[AttributeDescriptor] { &self.attributes }
//!     fn id_attribute(&self) -> &AttributeDescriptor { &self.attributes[0] }
//!     fn parent_attribute(&self, _parent_type: &str) -> Option<&AttributeDescriptor> { None }
//!     fn child_mappings(&self) -> &[relstore::mapping::ChildMapping] { &[] }
//!
//!     fn get_value(&self, object: &dyn Any, attr: &AttributeDescriptor) -> Result<Value> {
//!         let person = object.downcast_ref::<Person>().unwrap();
//!         Ok(match attr.field_name.as_str() {
//!             "id" => Value::Int64(person.id),
//!             "name" => Value::String(person.name.clone()),
//!             other => return Err(relstore::Error::mapping(format!("no such attribute {other}"))),
//!         })
//!     }
//!     fn set_value(&self, object: &mut dyn Any, attr: &AttributeDescriptor, value: Value) -> Result<()> {
//!         let person = object.downcast_mut::<Person>().unwrap();
//!         match attr.field_name.as_str() {
//!             "id" => person.id = value.as_i64().unwrap_or_default(),
//!             "name" => if let Value::String(s) = value { person.name = s },
//!             _ => {}
//!         }
//!         Ok(())
//!     }
//!     fn get_children(&self, _object: &dyn Any, _child: &relstore::mapping::ChildMapping) -> Result<Vec<ObjectBox>> { Ok(Vec::new()) }
//!     fn set_children(&self, _object: &mut dyn Any, _children: Vec<ObjectBox>, _child: &relstore::mapping::ChildMapping) -> Result<()> { Ok(()) }
//!     fn create_object(&self, mut values: Vec<Value>, _as_child: bool) -> Result<ObjectBox> {
//!         let name = match values.remove(1) { Value::String(s) => s, _ => String::new() };
//!         let id = values.remove(0).as_i64().unwrap_or_default();
//!         Ok(Box::new(Person { id, name, persistent: false }))
//!     }
//!     fn is_persistent(&self, object: &dyn Any) -> bool { object.downcast_ref::<Person>().unwrap().persistent }
//!     fn set_persistent(&self, object: &mut dyn Any, value: bool) { object.downcast_mut::<Person>().unwrap().persistent = value; }
//!     fn is_storing(&self, _object: &dyn Any) -> bool { false }
//!     fn set_storing(&self, _object: &mut dyn Any, _value: bool) {}
//! }
//!
//! # fn main() -> Result<()> {
//! let manager = StorageManager::new();
//! manager.register("default", Arc::new(SqliteConnectionFactory::in_memory()), DialectParams::sqlite());
//! manager.register_mapping_factory("Person", || {
//!     Arc::new(PersonMapping {
//!         attributes: vec![
//!             AttributeDescriptor::new("id", Datatype::Int64).id().autogenerated(),
//!             AttributeDescriptor::new("name", Datatype::String(None)),
//!         ],
//!     })
//! });
//!
//! let handle = manager.get_storage(None)?;
//! let mapping = manager.get_mapping("Person")?;
//! handle.init_object_storage(mapping.as_ref())?;
//!
//! let mut ada = Person { id: 0, name: "ada".into(), persistent: false };
//! handle.store(&manager, mapping.as_ref(), &mut ada)?;
//!
//! let predicate = QueryPredicate::for_type("Person")
//!     .with_criteria(Criteria::if_field("name", Criteria::equal_to(Value::String("ada".into()))));
//! let rows = handle.query(mapping.as_ref(), &predicate)?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod lazy;
pub mod manager;
pub mod mapping;
pub mod predicate;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod value;

pub use error::{Error, Result};
pub use manager::StorageManager;
pub use storage::StorageHandle;
pub use transaction::GroupTransaction;
