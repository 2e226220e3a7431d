//! Shared fixture for the integration suite: a small `TestRecord`/
//! `TestDetail` object graph with one parent-to-many-children relationship,
//! wired up against an in-memory SQLite backend.

use std::any::Any;
use std::sync::Arc;

use relstore::connection::sqlite::SqliteConnectionFactory;
use relstore::dialect::DialectParams;
use relstore::lazy::LazyChildList;
use relstore::mapping::{AttributeDescriptor, ChildMapping, ObjectBox, ObjectMapping};
use relstore::manager::StorageManager;
use relstore::storage::StorageHandle;
use relstore::value::{Datatype, Value};
use relstore::Result;

#[derive(Clone)]
pub struct TestDetail {
    pub id: i64,
    pub test_record_id: i64,
    pub name: String,
    pub persistent: bool,
    pub storing: bool,
}

impl TestDetail {
    pub fn new(name: impl Into<String>) -> Self {
        TestDetail {
            id: 0,
            test_record_id: 0,
            name: name.into(),
            persistent: false,
            storing: false,
        }
    }
}

pub struct TestRecord {
    pub id: i64,
    pub name: String,
    pub value: i64,
    pub persistent: bool,
    pub storing: bool,
    pub details: LazyChildList,
}

impl TestRecord {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        TestRecord {
            id: 0,
            name: name.into(),
            value,
            persistent: false,
            storing: false,
            details: LazyChildList::ready(Vec::new()),
        }
    }

    pub fn add_detail(&mut self, detail: TestDetail) {
        self.details.push(Box::new(detail)).expect("ready list never fails to push");
    }
}

pub struct TestDetailMapping {
    attributes: Vec<AttributeDescriptor>,
}

impl TestDetailMapping {
    pub fn new() -> Arc<Self> {
        Arc::new(TestDetailMapping {
            attributes: vec![
                AttributeDescriptor::new("id", Datatype::Int64).id().autogenerated(),
                AttributeDescriptor::new("testRecordId", Datatype::Int64)
                    .parent()
                    .with_references_type("TestRecord"),
                AttributeDescriptor::new("name", Datatype::String(None)).mandatory(),
            ],
        })
    }
}

impl ObjectMapping for TestDetailMapping {
    fn type_name(&self) -> &str {
        "TestDetail"
    }

    fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    fn id_attribute(&self) -> &AttributeDescriptor {
        &self.attributes[0]
    }

    fn parent_attribute(&self, parent_type: &str) -> Option<&AttributeDescriptor> {
        if parent_type == "TestRecord" {
            Some(&self.attributes[1])
        } else {
            None
        }
    }

    fn child_mappings(&self) -> &[ChildMapping] {
        &[]
    }

    fn get_value(&self, object: &dyn Any, attr: &AttributeDescriptor) -> Result<Value> {
        let detail = object.downcast_ref::<TestDetail>().unwrap();
        Ok(match attr.field_name.as_str() {
            "id" => Value::Int64(detail.id),
            "testRecordId" => Value::Int64(detail.test_record_id),
            "name" => Value::String(detail.name.clone()),
            other => return Err(relstore::Error::mapping(format!("no such attribute {other}"))),
        })
    }

    fn set_value(&self, object: &mut dyn Any, attr: &AttributeDescriptor, value: Value) -> Result<()> {
        let detail = object.downcast_mut::<TestDetail>().unwrap();
        match attr.field_name.as_str() {
            "id" => detail.id = value.as_i64().unwrap_or_default(),
            "testRecordId" => detail.test_record_id = value.as_i64().unwrap_or_default(),
            "name" => {
                if let Value::String(s) = value {
                    detail.name = s;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn get_children(&self, _object: &dyn Any, _child: &ChildMapping) -> Result<Vec<ObjectBox>> {
        Ok(Vec::new())
    }

    fn set_children(&self, _object: &mut dyn Any, _children: Vec<ObjectBox>, _child: &ChildMapping) -> Result<()> {
        Ok(())
    }

    fn create_object(&self, mut values: Vec<Value>, _as_child: bool) -> Result<ObjectBox> {
        let name = match values.remove(2) {
            Value::String(s) => s,
            _ => String::new(),
        };
        let test_record_id = values.remove(1).as_i64().unwrap_or_default();
        let id = values.remove(0).as_i64().unwrap_or_default();
        Ok(Box::new(TestDetail {
            id,
            test_record_id,
            name,
            persistent: false,
            storing: false,
        }))
    }

    fn is_persistent(&self, object: &dyn Any) -> bool {
        object.downcast_ref::<TestDetail>().unwrap().persistent
    }

    fn set_persistent(&self, object: &mut dyn Any, value: bool) {
        object.downcast_mut::<TestDetail>().unwrap().persistent = value;
    }

    fn is_storing(&self, object: &dyn Any) -> bool {
        object.downcast_ref::<TestDetail>().unwrap().storing
    }

    fn set_storing(&self, object: &mut dyn Any, value: bool) {
        object.downcast_mut::<TestDetail>().unwrap().storing = value;
    }
}

pub struct TestRecordMapping {
    attributes: Vec<AttributeDescriptor>,
    children: Vec<ChildMapping>,
}

impl TestRecordMapping {
    pub fn new(detail_mapping: Arc<TestDetailMapping>) -> Arc<Self> {
        Arc::new(TestRecordMapping {
            attributes: vec![
                AttributeDescriptor::new("id", Datatype::Int64).id().autogenerated(),
                AttributeDescriptor::new("name", Datatype::String(None)).mandatory().indexed(),
                AttributeDescriptor::new("value", Datatype::Int64),
            ],
            children: vec![ChildMapping::new(detail_mapping, "details")],
        })
    }
}

impl ObjectMapping for TestRecordMapping {
    fn type_name(&self) -> &str {
        "TestRecord"
    }

    fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    fn id_attribute(&self) -> &AttributeDescriptor {
        &self.attributes[0]
    }

    fn parent_attribute(&self, _parent_type: &str) -> Option<&AttributeDescriptor> {
        None
    }

    fn child_mappings(&self) -> &[ChildMapping] {
        &self.children
    }

    fn get_value(&self, object: &dyn Any, attr: &AttributeDescriptor) -> Result<Value> {
        let record = object.downcast_ref::<TestRecord>().unwrap();
        Ok(match attr.field_name.as_str() {
            "id" => Value::Int64(record.id),
            "name" => Value::String(record.name.clone()),
            "value" => Value::Int64(record.value),
            other => return Err(relstore::Error::mapping(format!("no such attribute {other}"))),
        })
    }

    fn set_value(&self, object: &mut dyn Any, attr: &AttributeDescriptor, value: Value) -> Result<()> {
        let record = object.downcast_mut::<TestRecord>().unwrap();
        match attr.field_name.as_str() {
            "id" => record.id = value.as_i64().unwrap_or_default(),
            "name" => {
                if let Value::String(s) = value {
                    record.name = s;
                }
            }
            "value" => record.value = value.as_i64().unwrap_or_default(),
            _ => {}
        }
        Ok(())
    }

    fn get_children(&self, object: &dyn Any, _child: &ChildMapping) -> Result<Vec<ObjectBox>> {
        let record = object.downcast_ref::<TestRecord>().unwrap();
        record.details.with_items(|items| {
            items
                .iter()
                .map(|item| Box::new(item.downcast_ref::<TestDetail>().unwrap().clone()) as ObjectBox)
                .collect()
        })
    }

    fn set_children(&self, object: &mut dyn Any, children: Vec<ObjectBox>, _child: &ChildMapping) -> Result<()> {
        let record = object.downcast_mut::<TestRecord>().unwrap();
        record.details = LazyChildList::ready(children);
        Ok(())
    }

    fn create_object(&self, mut values: Vec<Value>, _as_child: bool) -> Result<ObjectBox> {
        let value = values.remove(2).as_i64().unwrap_or_default();
        let name = match values.remove(1) {
            Value::String(s) => s,
            _ => String::new(),
        };
        let id = values.remove(0).as_i64().unwrap_or_default();
        Ok(Box::new(TestRecord {
            id,
            name,
            value,
            persistent: false,
            storing: false,
            details: LazyChildList::ready(Vec::new()),
        }))
    }

    fn install_lazy_children(&self, object: &mut dyn Any, _child: &ChildMapping, lazy: LazyChildList) -> Result<()> {
        let record = object.downcast_mut::<TestRecord>().unwrap();
        record.details = lazy;
        Ok(())
    }

    fn is_persistent(&self, object: &dyn Any) -> bool {
        object.downcast_ref::<TestRecord>().unwrap().persistent
    }

    fn set_persistent(&self, object: &mut dyn Any, value: bool) {
        object.downcast_mut::<TestRecord>().unwrap().persistent = value;
    }

    fn is_storing(&self, object: &dyn Any) -> bool {
        object.downcast_ref::<TestRecord>().unwrap().storing
    }

    fn set_storing(&self, object: &mut dyn Any, value: bool) {
        object.downcast_mut::<TestRecord>().unwrap().storing = value;
    }
}

/// Builds a manager registered against a fresh in-memory SQLite backend,
/// with both mappings registered and their tables created.
pub fn build_manager() -> Result<(StorageManager, StorageHandle)> {
    build_manager_with_factory(Arc::new(SqliteConnectionFactory::in_memory()))
}

/// Like `build_manager`, but against any connection factory — used by the
/// file-backend suite to point the same fixture at an on-disk database.
pub fn build_manager_with_factory(factory: Arc<dyn relstore::connection::ConnectionFactory>) -> Result<(StorageManager, StorageHandle)> {
    let manager = StorageManager::new();
    manager.register("default", factory, DialectParams::sqlite());

    let detail_mapping = TestDetailMapping::new();
    manager.register_mapping_factory("TestDetail", {
        let detail_mapping = detail_mapping.clone();
        move || detail_mapping.clone() as Arc<dyn ObjectMapping>
    });
    manager.register_mapping_factory("TestRecord", {
        let detail_mapping = detail_mapping.clone();
        move || TestRecordMapping::new(detail_mapping.clone()) as Arc<dyn ObjectMapping>
    });

    let handle = manager.get_storage(None)?;
    let record_mapping = manager.get_mapping("TestRecord")?;
    handle.init_object_storage(record_mapping.as_ref())?;
    Ok((manager, handle))
}
