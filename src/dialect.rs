//! Default dialect parameters (component I, §6): per-storage overrides for
//! identifier quoting, auto-id datatype, fuzzy-search function and paging
//! syntax.

use crate::value::Datatype;
use std::collections::HashMap;

/// The paging template a dialect emits, expressed as printf-style
/// placeholders for offset and limit (§4.3 "Paging"). `None` disables
/// paging for that clause on dialects that don't support it.
#[derive(Debug, Clone)]
pub struct PagingTemplate {
    pub offset: Option<String>,
    pub limit: Option<String>,
}

impl Default for PagingTemplate {
    fn default() -> Self {
        PagingTemplate {
            offset: Some("OFFSET %d".to_string()),
            limit: Some("LIMIT %d".to_string()),
        }
    }
}

/// Per-dialect overrides (§6 "Dialect configuration knobs").
#[derive(Debug, Clone)]
pub struct DialectParams {
    pub identifier_quote: char,
    /// The SQL fragment used for an autogenerated id column, e.g.
    /// `INTEGER AUTO_INCREMENT` or `SERIAL`.
    pub auto_id_sql: String,
    /// The fuzzy-match SQL function name used by `similar_to`.
    pub fuzzy_function: String,
    pub paging: PagingTemplate,
    /// Per-datatype overrides of the standard SQL datatype table (§4.5),
    /// e.g. `TEXT` for strings in PostgreSQL.
    pub datatype_overrides: HashMap<DatatypeKey, String>,
    /// Whether the underlying driver supports `row_number() OVER (...)`
    /// (used by `position_of_id`, §4.4).
    pub supports_window_functions: bool,
    /// Whether the underlying driver supports transactions at all; if not,
    /// `commit`/`rollback` are no-ops (§4.5).
    pub supports_transactions: bool,
}

/// A coarse key for datatype-table overrides: dialects rarely need to
/// distinguish `String(Some(40))` from `String(Some(80))`, only the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeKey {
    Int8,
    Int16,
    Int32,
    Int64,
    Bytes,
    Float32,
    Float64,
    Boolean,
    BigInt,
    BigDecimal,
    String,
    Enum,
    TypeHandle,
    Duration,
    Timestamp,
    Date,
    Time,
    Collection,
    Map,
    DefaultString,
}

impl DatatypeKey {
    pub fn of(datatype: &Datatype) -> Self {
        match datatype {
            Datatype::Int8 => DatatypeKey::Int8,
            Datatype::Int16 => DatatypeKey::Int16,
            Datatype::Int32 => DatatypeKey::Int32,
            Datatype::Int64 => DatatypeKey::Int64,
            Datatype::Bytes => DatatypeKey::Bytes,
            Datatype::Float32 => DatatypeKey::Float32,
            Datatype::Float64 => DatatypeKey::Float64,
            Datatype::Boolean => DatatypeKey::Boolean,
            Datatype::BigInt => DatatypeKey::BigInt,
            Datatype::BigDecimal => DatatypeKey::BigDecimal,
            Datatype::String(_) => DatatypeKey::String,
            Datatype::Enum { .. } => DatatypeKey::Enum,
            Datatype::TypeHandle { .. } => DatatypeKey::TypeHandle,
            Datatype::Duration => DatatypeKey::Duration,
            Datatype::Timestamp => DatatypeKey::Timestamp,
            Datatype::Date => DatatypeKey::Date,
            Datatype::Time => DatatypeKey::Time,
            Datatype::Collection { .. } => DatatypeKey::Collection,
            Datatype::Map { .. } => DatatypeKey::Map,
            Datatype::DefaultString => DatatypeKey::DefaultString,
        }
    }
}

impl Default for DialectParams {
    fn default() -> Self {
        DialectParams {
            identifier_quote: '"',
            auto_id_sql: "INTEGER AUTO_INCREMENT".to_string(),
            fuzzy_function: "soundex".to_string(),
            paging: PagingTemplate::default(),
            datatype_overrides: HashMap::new(),
            supports_window_functions: true,
            supports_transactions: true,
        }
    }
}

impl DialectParams {
    /// The standard SQL datatype table (§4.5), before dialect overrides.
    pub fn sql_datatype(&self, datatype: &Datatype) -> String {
        if let Some(custom) = self.datatype_overrides.get(&DatatypeKey::of(datatype)) {
            return custom.clone();
        }
        standard_sql_datatype(datatype)
    }

    pub fn mysql() -> Self {
        let mut datatype_overrides = HashMap::new();
        datatype_overrides.insert(DatatypeKey::String, "VARCHAR(255)".to_string());
        DialectParams {
            identifier_quote: '`',
            auto_id_sql: "INTEGER AUTO_INCREMENT".to_string(),
            fuzzy_function: "soundex".to_string(),
            paging: PagingTemplate::default(),
            datatype_overrides,
            supports_window_functions: true,
            supports_transactions: true,
        }
    }

    pub fn postgres() -> Self {
        let mut datatype_overrides = HashMap::new();
        datatype_overrides.insert(DatatypeKey::String, "TEXT".to_string());
        datatype_overrides.insert(DatatypeKey::DefaultString, "TEXT".to_string());
        DialectParams {
            identifier_quote: '"',
            auto_id_sql: "SERIAL".to_string(),
            fuzzy_function: "dmetaphone".to_string(),
            paging: PagingTemplate::default(),
            datatype_overrides,
            supports_window_functions: true,
            supports_transactions: true,
        }
    }

    /// SQLite: no real fuzzy-match function shipped by default, and no
    /// dedicated autogenerated column datatype beyond `INTEGER PRIMARY KEY`
    /// rowid aliasing.
    pub fn sqlite() -> Self {
        DialectParams {
            identifier_quote: '"',
            auto_id_sql: "INTEGER".to_string(),
            fuzzy_function: "soundex".to_string(),
            paging: PagingTemplate::default(),
            datatype_overrides: HashMap::new(),
            supports_window_functions: true,
            supports_transactions: true,
        }
    }
}

fn standard_sql_datatype(datatype: &Datatype) -> String {
    match datatype {
        Datatype::Int8 => "TINYINT".to_string(),
        Datatype::Int16 => "SMALLINT".to_string(),
        Datatype::Int32 => "INTEGER".to_string(),
        Datatype::Int64 => "BIGINT".to_string(),
        Datatype::Bytes => "BLOB".to_string(),
        Datatype::Float32 => "REAL".to_string(),
        Datatype::Float64 => "DOUBLE PRECISION".to_string(),
        Datatype::Boolean => "BOOLEAN".to_string(),
        Datatype::BigInt => "NUMERIC".to_string(),
        Datatype::BigDecimal => "NUMERIC".to_string(),
        Datatype::String(Some(len)) => format!("VARCHAR({len})"),
        Datatype::String(None) => "VARCHAR(255)".to_string(),
        Datatype::Enum { .. } => "VARCHAR(100)".to_string(),
        Datatype::TypeHandle { .. } => "VARCHAR(255)".to_string(),
        Datatype::Duration => "VARCHAR(64)".to_string(),
        Datatype::Timestamp => "TIMESTAMP".to_string(),
        Datatype::Date => "DATE".to_string(),
        Datatype::Time => "TIME".to_string(),
        Datatype::Collection { .. } => "VARCHAR(4000)".to_string(),
        Datatype::Map { .. } => "VARCHAR(4000)".to_string(),
        Datatype::DefaultString => "VARCHAR(255)".to_string(),
    }
}
