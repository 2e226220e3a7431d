//! The storage-mapping model (component B, §4.2): a language-independent
//! description of how a domain type projects onto a table, plus the value
//! conversion policies (`check_attribute_value` / `map_value`).
//!
//! The framework core never knows the concrete Rust type of a mapped
//! object — mappings operate on `&dyn Any` the way the source's reflection
//! layer operates on arbitrary fields (§9 "Design Notes"). Application code
//! is expected to write one `ObjectMapping` implementation per domain type
//! and downcast at its own call sites (see `Person`/`PersonMapping` in
//! `lib.rs`).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::dialect::DialectParams;
use crate::error::{Error, Result};
use crate::predicate::Criteria;
use crate::value::{Datatype, EnumValue, Value};

/// A boxed, type-erased domain object moving through the framework.
pub type ObjectBox = Box<dyn Any + Send>;

/// Metadata for one persisted field (§3 "Attribute descriptor").
#[derive(Clone)]
pub struct AttributeDescriptor {
    pub field_name: String,
    pub datatype: Datatype,
    pub id: bool,
    pub parent: bool,
    pub reference: bool,
    pub autogenerated: bool,
    pub mandatory: bool,
    pub unique: bool,
    pub indexed: bool,
    /// Configured generic storage name, second in `get_sql_name`'s priority.
    pub storage_name: Option<String>,
    /// Explicit SQL name, first in `get_sql_name`'s priority.
    pub sql_name_override: Option<String>,
    /// Type-handle attributes only: emit the simple name instead of the
    /// fully-qualified one.
    pub omit_namespace: bool,
    /// For `parent`/`reference` attributes: the type name of the table the
    /// foreign key points at (used by `init_object_storage`'s CREATE TABLE
    /// synthesis, §4.5).
    pub references_type: Option<String>,
    sql_name_cache: Arc<OnceLock<String>>,
}

impl AttributeDescriptor {
    pub fn new(field_name: impl Into<String>, datatype: Datatype) -> Self {
        AttributeDescriptor {
            field_name: field_name.into(),
            datatype,
            id: false,
            parent: false,
            reference: false,
            autogenerated: false,
            mandatory: false,
            unique: false,
            indexed: false,
            storage_name: None,
            sql_name_override: None,
            omit_namespace: false,
            references_type: None,
            sql_name_cache: Arc::new(OnceLock::new()),
        }
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self.mandatory = true;
        self
    }

    pub fn parent(mut self) -> Self {
        self.parent = true;
        self.reference = true;
        self
    }

    pub fn reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn autogenerated(mut self) -> Self {
        self.autogenerated = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_storage_name(mut self, name: impl Into<String>) -> Self {
        self.storage_name = Some(name.into());
        self
    }

    pub fn with_sql_name(mut self, name: impl Into<String>) -> Self {
        self.sql_name_override = Some(name.into());
        self
    }

    pub fn with_omit_namespace(mut self) -> Self {
        self.omit_namespace = true;
        self
    }

    pub fn with_references_type(mut self, type_name: impl Into<String>) -> Self {
        self.references_type = Some(type_name.into());
        self
    }

    /// `get_sql_name` (§4.3): explicit SQL name → generic storage name →
    /// the field's display name split on camelCase boundaries and
    /// lower-cased. The result is cached on the descriptor.
    pub fn sql_name(&self) -> &str {
        self.sql_name_cache.get_or_init(|| {
            if let Some(name) = &self.sql_name_override {
                name.clone()
            } else if let Some(name) = &self.storage_name {
                name.clone()
            } else {
                camel_to_snake(&self.field_name)
            }
        })
    }

    /// The quoted form of `sql_name`, per the dialect's identifier quote.
    pub fn quoted_sql_name(&self, dialect: &DialectParams) -> String {
        format!("{q}{n}{q}", q = dialect.identifier_quote, n = self.sql_name())
    }
}

impl fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("field_name", &self.field_name)
            .field("datatype", &self.datatype)
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("reference", &self.reference)
            .finish()
    }
}

impl PartialEq for AttributeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.field_name == other.field_name
            && self.datatype == other.datatype
            && self.id == other.id
            && self.parent == other.parent
            && self.reference == other.reference
    }
}

pub(crate) fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Associates a child mapping with the collection-valued attribute on the
/// parent that holds it (§3 "Storage mapping").
#[derive(Clone)]
pub struct ChildMapping {
    pub mapping: Arc<dyn ObjectMapping>,
    pub collection_attribute: String,
}

impl ChildMapping {
    pub fn new(mapping: Arc<dyn ObjectMapping>, collection_attribute: impl Into<String>) -> Self {
        ChildMapping {
            mapping,
            collection_attribute: collection_attribute.into(),
        }
    }
}

/// The per-type schema object (§4.2). Implemented once per domain type by
/// the host application; the framework only ever holds `Arc<dyn
/// ObjectMapping>` and calls through this trait.
pub trait ObjectMapping: Send + Sync {
    fn type_name(&self) -> &str;
    fn attributes(&self) -> &[AttributeDescriptor];
    fn id_attribute(&self) -> &AttributeDescriptor;
    /// The attribute on this mapping that points back at `parent_type`, if
    /// this mapping is ever queried as a child of it.
    fn parent_attribute(&self, parent_type: &str) -> Option<&AttributeDescriptor>;
    fn child_mappings(&self) -> &[ChildMapping];

    /// The table this mapping projects onto. Default: `type_name` split on
    /// camelCase boundaries, e.g. `OrderLine` -> `order_line`.
    fn table_name(&self) -> String {
        camel_to_snake(self.type_name())
    }

    fn get_value(&self, object: &dyn Any, attr: &AttributeDescriptor) -> Result<Value>;
    fn set_value(&self, object: &mut dyn Any, attr: &AttributeDescriptor, value: Value) -> Result<()>;

    fn get_children(&self, object: &dyn Any, child: &ChildMapping) -> Result<Vec<ObjectBox>>;
    fn set_children(
        &self,
        object: &mut dyn Any,
        children: Vec<ObjectBox>,
        child: &ChildMapping,
    ) -> Result<()>;
    /// Back-fills parent back-references in each child, called once a lazy
    /// child list materializes (§4.4). Takes the parent's id rather than the
    /// parent object itself: the parent object owns the `LazyChildList` this
    /// runs from, so a live `&dyn Any` back to it isn't available by the
    /// time the materializer fires.
    fn init_children(
        &self,
        parent_id: &Value,
        children: &mut [ObjectBox],
        child: &ChildMapping,
    ) -> Result<()> {
        let _ = (parent_id, children, child);
        Ok(())
    }

    fn create_object(&self, values: Vec<Value>, as_child: bool) -> Result<ObjectBox>;

    /// Installs a child collection that defers its own query until first
    /// read (§4.8 `LazyChildList`). The default eagerly materializes and
    /// delegates to `set_children`; a mapping whose host field can hold a
    /// `LazyChildList` itself (or a handle to one) overrides this to stash
    /// `lazy` there instead, preserving the no-query-on-creation guarantee.
    fn install_lazy_children(
        &self,
        object: &mut dyn Any,
        child: &ChildMapping,
        lazy: crate::lazy::LazyChildList,
    ) -> Result<()> {
        let items = lazy.into_items()?;
        self.set_children(object, items, child)
    }

    fn is_persistent(&self, object: &dyn Any) -> bool;
    fn set_persistent(&self, object: &mut dyn Any, value: bool);
    fn is_storing(&self, object: &dyn Any) -> bool;
    fn set_storing(&self, object: &mut dyn Any, value: bool);
    /// `None` means this mapping does not track a modification flag, so
    /// attributes are always re-written on update (Invariant 6).
    fn is_modified(&self, object: &dyn Any) -> Option<bool> {
        let _ = object;
        None
    }
    fn clear_modified(&self, object: &mut dyn Any) {
        let _ = object;
    }

    fn check_attribute_value(&self, attr: &AttributeDescriptor, value: Value) -> Result<Value> {
        default_check_attribute_value(attr, value)
    }

    fn map_value(&self, attr: &AttributeDescriptor, value: &Value) -> Value {
        default_map_value(attr, value)
    }

    fn default_criteria(&self) -> Option<Criteria> {
        None
    }

    fn is_delete_allowed(&self) -> bool {
        true
    }

    /// Drops the trailing `_cc_<child_table>` cached-size columns this
    /// mapping's table would otherwise carry (§6 "Child-count column"),
    /// forcing its lazy child lists to size themselves by materializing.
    fn disable_child_counts(&self) -> bool {
        false
    }

    fn is_hierarchy_attribute(&self, attr: &AttributeDescriptor) -> bool {
        attr.parent
    }

    /// Returns an embedded, not-yet-persisted object behind a `reference`
    /// attribute (the referenced type name and the object itself), if this
    /// mapping holds one inline rather than just an already-persisted id.
    /// Used by `StorageHandle::store`'s reference-before-object step
    /// (§4.2). Default: no embedded object — the attribute already holds a
    /// foreign id.
    fn take_embedded_reference(
        &self,
        object: &mut dyn Any,
        attr: &AttributeDescriptor,
    ) -> Option<(String, ObjectBox)> {
        let _ = (object, attr);
        None
    }

    /// Default: open a transaction, find the right storage for the
    /// referenced type, store, commit; on error roll back and swallow the
    /// rollback failure (logged) (§4.2, §4.7).
    fn store_reference(
        &self,
        manager: &crate::manager::StorageManager,
        handle: &mut crate::storage::StorageHandle,
        referenced_type: &str,
        referenced: &mut ObjectBox,
    ) -> Result<()> {
        crate::transaction::default_store_reference(manager, handle, referenced_type, referenced)
    }
}

/// Resolves a type name to its mapping, used by the compiler to lower
/// sub-query predicates (`has_child`/`refers_to`) without depending on
/// `manager.rs` directly. `StorageManager` implements this.
pub trait MappingResolver {
    fn resolve(&self, type_name: &str) -> Result<Arc<dyn ObjectMapping>>;
}

/// Value conversion policy for incoming values (`check_attribute_value`,
/// §4.2).
pub fn default_check_attribute_value(attr: &AttributeDescriptor, value: Value) -> Result<Value> {
    let datatype = &attr.datatype;

    if matches!(datatype, Datatype::String(_)) {
        return Ok(value);
    }

    let converted = match &value {
        Value::String(s) => parse_string_for_datatype(datatype, s)?,
        other => other.clone(),
    };

    let widened = widen_numeric(datatype, converted);
    check_final_type(datatype, widened)
}

fn parse_string_for_datatype(datatype: &Datatype, s: &str) -> Result<Value> {
    match datatype {
        Datatype::TypeHandle { .. } => Ok(Value::String(s.to_string())),
        Datatype::Enum { .. } => Ok(Value::Enum(parse_enum_literal(s))),
        Datatype::Duration | Datatype::Time => Ok(Value::String(s.to_string())),
        Datatype::Timestamp => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::Timestamp(dt.with_timezone(&chrono::Utc)))
            .map_err(|e| Error::mapping(format!("invalid timestamp {s:?}: {e}"))),
        Datatype::Date => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| Error::mapping(format!("invalid date {s:?}: {e}"))),
        Datatype::Collection { element, ordered } => parse_collection(s, element, *ordered),
        Datatype::Map { key, value } => parse_map(s, key, value),
        Datatype::Boolean => match s {
            "true" | "TRUE" | "1" => Ok(Value::Boolean(true)),
            "false" | "FALSE" | "0" => Ok(Value::Boolean(false)),
            _ => Err(Error::mapping(format!("invalid boolean literal {s:?}"))),
        },
        Datatype::Int8 | Datatype::Int16 | Datatype::Int32 | Datatype::Int64 => s
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| Error::mapping(format!("invalid integer literal {s:?}: {e}"))),
        Datatype::Float32 | Datatype::Float64 => s
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| Error::mapping(format!("invalid float literal {s:?}: {e}"))),
        // BigInt/BigDecimal/Bytes/DefaultString: no host parser is wired up
        // for these; per §4.2's fallback, an unrecognized conversion leaves
        // the string unchanged.
        _ => Ok(Value::String(s.to_string())),
    }
}

fn parse_enum_literal(s: &str) -> EnumValue {
    if let Some(dash) = s.find('-') {
        let (ordinal_part, rest) = s.split_at(dash);
        if !ordinal_part.is_empty() && ordinal_part.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(ordinal) = ordinal_part.parse::<i64>() {
                return EnumValue {
                    ordinal,
                    name: rest[1..].to_string(),
                };
            }
        }
    }
    EnumValue {
        ordinal: 0,
        name: s.to_string(),
    }
}

fn parse_collection(s: &str, element: &Datatype, _ordered: bool) -> Result<Value> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(s).map_err(|e| Error::mapping(format!("invalid collection literal: {e}")))?;
    let mut items = Vec::with_capacity(raw.len());
    for item in raw {
        items.push(json_to_value(item, element)?);
    }
    Ok(Value::Collection(items))
}

fn parse_map(s: &str, key: &Datatype, value: &Datatype) -> Result<Value> {
    let raw: std::collections::BTreeMap<String, serde_json::Value> =
        serde_json::from_str(s).map_err(|e| Error::mapping(format!("invalid map literal: {e}")))?;
    let mut map = std::collections::BTreeMap::new();
    for (k, v) in raw {
        // Keys round-trip as strings regardless of `key`'s datatype class;
        // re-parsing a key into a non-string datatype is left to the caller
        // via `get_value`/`set_value` on the reconstructed map.
        let _ = key;
        map.insert(k, json_to_value(v, value)?);
    }
    Ok(Value::Map(map))
}

fn json_to_value(json: serde_json::Value, datatype: &Datatype) -> Result<Value> {
    use serde_json::Value as J;
    Ok(match (json, datatype) {
        (J::Null, _) => Value::Null,
        (J::Bool(b), _) => Value::Boolean(b),
        (J::String(s), _) => Value::String(s),
        (J::Number(n), Datatype::Float32) | (J::Number(n), Datatype::Float64) => {
            Value::Float64(n.as_f64().unwrap_or_default())
        }
        (J::Number(n), _) => Value::Int64(n.as_i64().unwrap_or_default()),
        (J::Array(items), Datatype::Collection { element, .. }) => Value::Collection(
            items
                .into_iter()
                .map(|i| json_to_value(i, element))
                .collect::<Result<Vec<_>>>()?,
        ),
        (J::Array(items), _) => Value::Collection(
            items
                .into_iter()
                .map(|i| json_to_value(i, &Datatype::DefaultString))
                .collect::<Result<Vec<_>>>()?,
        ),
        (J::Object(obj), Datatype::Map { value: vt, .. }) => {
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in obj {
                map.insert(k, json_to_value(v, vt)?);
            }
            Value::Map(map)
        }
        (J::Object(obj), _) => {
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in obj {
                map.insert(k, json_to_value(v, &Datatype::DefaultString)?);
            }
            Value::Map(map)
        }
    })
}

fn widen_numeric(datatype: &Datatype, value: Value) -> Value {
    match (datatype, &value) {
        (Datatype::Int64, Value::Int8(v)) => Value::Int64(*v as i64),
        (Datatype::Int64, Value::Int16(v)) => Value::Int64(*v as i64),
        (Datatype::Int64, Value::Int32(v)) => Value::Int64(*v as i64),
        (Datatype::Int64, Value::Float32(v)) if v.fract() == 0.0 => Value::Int64(*v as i64),
        (Datatype::Int64, Value::Float64(v)) if v.fract() == 0.0 => Value::Int64(*v as i64),
        (Datatype::BigInt, Value::BigDecimal(s)) => match s.split_once('.') {
            Some((whole, fraction)) if fraction.chars().all(|c| c == '0') => {
                Value::BigInt(whole.to_string())
            }
            None => Value::BigInt(s.clone()),
            _ => value,
        },
        _ => value,
    }
}

fn check_final_type(datatype: &Datatype, value: Value) -> Result<Value> {
    let ok = match (datatype, &value) {
        (_, Value::Null) => true,
        (Datatype::Boolean, Value::Boolean(_)) => true,
        (Datatype::Int8, Value::Int8(_)) => true,
        (Datatype::Int16, Value::Int16(_)) => true,
        (Datatype::Int32, Value::Int32(_)) => true,
        (Datatype::Int64, Value::Int64(_)) => true,
        (Datatype::Float32, Value::Float32(_)) => true,
        (Datatype::Float64, Value::Float64(_)) => true,
        (Datatype::Bytes, Value::Bytes(_)) => true,
        (Datatype::String(_), Value::String(_)) => true,
        (Datatype::BigInt, Value::BigInt(_)) => true,
        (Datatype::BigDecimal, Value::BigDecimal(_)) => true,
        (Datatype::Enum { .. }, Value::Enum(_)) => true,
        (Datatype::TypeHandle { .. }, Value::String(_)) => true,
        (Datatype::Duration, Value::String(_)) => true,
        (Datatype::Timestamp, Value::Timestamp(_)) => true,
        (Datatype::Date, Value::Date(_)) => true,
        (Datatype::Time, Value::String(_)) => true,
        (Datatype::Collection { .. }, Value::Collection(_)) => true,
        (Datatype::Map { .. }, Value::Map(_)) => true,
        (Datatype::DefaultString, _) => true,
        _ => false,
    };
    if ok {
        Ok(value)
    } else {
        Err(Error::mapping(format!(
            "type mismatch: value of type {} does not satisfy declared datatype {:?}",
            value.type_name(),
            datatype
        )))
    }
}

/// Outgoing value mapping (`map_value`, §4.2).
pub fn default_map_value(attr: &AttributeDescriptor, value: &Value) -> Value {
    match &attr.datatype {
        Datatype::Enum { ordered } => match value {
            Value::Enum(e) if *ordered => Value::String(format!("{}-{}", e.ordinal, e.name)),
            Value::Enum(e) => Value::String(e.name.clone()),
            other => other.clone(),
        },
        Datatype::TypeHandle { omit_namespace } => match value {
            Value::String(name) if *omit_namespace || attr.omit_namespace => {
                Value::String(simple_name(name).to_string())
            }
            other => other.clone(),
        },
        Datatype::Collection { element, .. } => {
            Value::String(collection_to_canonical(value, element))
        }
        Datatype::Map { value: vt, .. } => Value::String(map_to_canonical(value, vt)),
        // calendar date without time: the outermost date type is preserved
        // as-is, never widened into a timestamp.
        Datatype::Date => value.clone(),
        Datatype::DefaultString => Value::String(value.to_string()),
        _ => value.clone(),
    }
}

fn simple_name(qualified: &str) -> &str {
    qualified.rsplit("::").next().unwrap_or(qualified)
}

fn collection_to_canonical(value: &Value, element: &Datatype) -> String {
    let items = value.as_collection().unwrap_or(&[]);
    let json: Vec<serde_json::Value> = items.iter().map(|v| value_to_json(v, element)).collect();
    serde_json::to_string(&json).unwrap_or_default()
}

fn map_to_canonical(value: &Value, value_type: &Datatype) -> String {
    let map = match value {
        Value::Map(m) => m.clone(),
        _ => Default::default(),
    };
    let json: std::collections::BTreeMap<String, serde_json::Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v, value_type)))
        .collect();
    serde_json::to_string(&json).unwrap_or_default()
}

fn value_to_json(value: &Value, datatype: &Datatype) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int8(v) => serde_json::json!(v),
        Value::Int16(v) => serde_json::json!(v),
        Value::Int32(v) => serde_json::json!(v),
        Value::Int64(v) => serde_json::json!(v),
        Value::Float32(v) => serde_json::json!(v),
        Value::Float64(v) => serde_json::json!(v),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Collection(items) => {
            let inner = match datatype {
                Datatype::Collection { element, .. } => element.as_ref(),
                other => other,
            };
            serde_json::Value::Array(items.iter().map(|v| value_to_json(v, inner)).collect())
        }
        Value::Map(map) => {
            let inner = match datatype {
                Datatype::Map { value, .. } => value.as_ref(),
                other => other,
            };
            serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), value_to_json(v, inner)))
                    .collect(),
            )
        }
        other => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_name_falls_back_to_camel_case_split() {
        let attr = AttributeDescriptor::new("firstName", Datatype::String(None));
        assert_eq!(attr.sql_name(), "first_name");
    }

    #[test]
    fn sql_name_prefers_explicit_override() {
        let attr = AttributeDescriptor::new("firstName", Datatype::String(None)).with_sql_name("fname");
        assert_eq!(attr.sql_name(), "fname");
    }

    #[test]
    fn enum_round_trips_through_ordinal_prefixed_form() {
        let attr = AttributeDescriptor::new("status", Datatype::Enum { ordered: true });
        let parsed = default_check_attribute_value(&attr, Value::String("2-ACTIVE".into())).unwrap();
        assert_eq!(
            parsed,
            Value::Enum(EnumValue {
                ordinal: 2,
                name: "ACTIVE".into()
            })
        );
        let mapped = default_map_value(&attr, &parsed);
        assert_eq!(mapped, Value::String("2-ACTIVE".into()));
    }

    #[test]
    fn int64_widens_from_smaller_ints() {
        let attr = AttributeDescriptor::new("count", Datatype::Int64);
        let widened = default_check_attribute_value(&attr, Value::Int32(7)).unwrap();
        assert_eq!(widened, Value::Int64(7));
    }

    #[test]
    fn collection_round_trips_as_canonical_json() {
        let attr = AttributeDescriptor::new(
            "tags",
            Datatype::Collection {
                element: Box::new(Datatype::String(None)),
                ordered: true,
            },
        );
        let value = Value::Collection(vec![Value::String("a".into()), Value::String("b".into())]);
        let wire = default_map_value(&attr, &value);
        let Value::String(text) = &wire else {
            panic!("expected canonical string");
        };
        let parsed = default_check_attribute_value(&attr, Value::String(text.clone())).unwrap();
        assert_eq!(parsed, value);
    }
}
