//! The external driver seam: `Connection`, `Cursor` and `ConnectionFactory`
//! (§5 "External Interfaces"). The framework core only ever depends on
//! these traits; concrete drivers are adapters, not part of the core.
//!
//! A `sqlite` feature (default on) wires up a `rusqlite`-backed adapter so
//! the crate's own tests and doctests have something real to run against.

use crate::compiler::{CompiledQuery, WriteTemplate};
use crate::error::{Error, Result};
use crate::value::Value;

/// A single result row, exposed positionally so callers don't need a
/// driver-specific row type.
pub trait Row {
    fn get(&self, index: usize) -> Result<Value>;
    fn len(&self) -> usize;
}

/// A forward-only (at minimum) iterator over a query's rows. Drivers that
/// support absolute/relative positioning (e.g. a scrollable cursor) may
/// additionally implement `Positionable`; the query executor falls back to
/// re-running the query with an adjusted offset when it can't.
pub trait Cursor {
    fn next_row(&mut self) -> Result<Option<Box<dyn Row>>>;
}

/// Optional capability: absolute/relative cursor positioning (§4.4
/// "Positioning"). Drivers that don't implement it leave `Query` to fall
/// back to offset-based re-querying.
pub trait Positionable: Cursor {
    fn seek_absolute(&mut self, position: u64) -> Result<()>;
    fn seek_relative(&mut self, delta: i64) -> Result<()>;
}

/// One logical database connection (§5). `store`/`query`/`execute_ddl` take
/// already-compiled SQL text and bind values; the trait never sees a
/// `Criteria` or an `ObjectMapping`.
pub trait Connection: Send {
    fn query(&mut self, compiled: &CompiledQuery) -> Result<Box<dyn Cursor + '_>>;

    /// Executes a write statement, returning the number of affected rows.
    fn execute(&mut self, template: &WriteTemplate, values: &[Value]) -> Result<u64>;

    /// Executes an insert and returns the autogenerated id, if the driver
    /// reports one.
    fn execute_insert(&mut self, template: &WriteTemplate, values: &[Value]) -> Result<Option<Value>>;

    fn execute_ddl(&mut self, sql: &str) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Whether the connection is still usable (§4.6 "is_valid").
    fn is_valid(&self) -> bool;
}

/// Opens connections against one configured backend (§5). Implementations
/// are expected to be cheap to clone/share (e.g. wrapping a pool handle);
/// `StorageManager` holds one factory per storage definition.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn Connection>>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! A `rusqlite`-backed `Connection`/`ConnectionFactory` adapter, used by
    //! this crate's own tests and by hosts that want a zero-setup backend.

    use super::*;
    use rusqlite::functions::FunctionFlags;
    use rusqlite::types::{Type as SqlType, Value as SqlValue, ValueRef};
    use rusqlite::{params_from_iter, Connection as RusqliteConnection, ToSql};
    use std::path::PathBuf;

    pub struct SqliteConnection {
        inner: RusqliteConnection,
    }

    impl SqliteConnection {
        pub fn open(path: &std::path::Path) -> Result<Self> {
            let inner = RusqliteConnection::open(path)
                .map_err(|e| Error::storage_with_source("failed to open sqlite connection", e))?;
            register_soundex(&inner)?;
            Ok(SqliteConnection { inner })
        }

        pub fn open_in_memory() -> Result<Self> {
            let inner = RusqliteConnection::open_in_memory()
                .map_err(|e| Error::storage_with_source("failed to open in-memory sqlite connection", e))?;
            register_soundex(&inner)?;
            Ok(SqliteConnection { inner })
        }
    }

    /// The bundled SQLite build ships without `SQLITE_SOUNDEX`, so
    /// `DialectParams::sqlite()`'s `similar_to` function name has nothing to
    /// call unless we register it ourselves. Standard Soundex: keep the
    /// first letter, map the rest to digits, collapse adjacent repeats, drop
    /// vowel/H/W/Y codes, pad to four characters.
    fn register_soundex(conn: &RusqliteConnection) -> Result<()> {
        conn.create_scalar_function(
            "soundex",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text = ctx.get::<String>(0)?;
                Ok(soundex_code(&text))
            },
        )
        .map_err(|e| Error::storage_with_source("failed to register soundex function", e))
    }

    fn soundex_digit(c: char) -> Option<u8> {
        match c.to_ascii_uppercase() {
            'B' | 'F' | 'P' | 'V' => Some(1),
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some(2),
            'D' | 'T' => Some(3),
            'L' => Some(4),
            'M' | 'N' => Some(5),
            'R' => Some(6),
            _ => None,
        }
    }

    fn soundex_code(input: &str) -> String {
        let mut letters = input.chars().filter(|c| c.is_ascii_alphabetic());
        let Some(first) = letters.next() else {
            return String::new();
        };
        let mut code = String::new();
        code.push(first.to_ascii_uppercase());
        let mut last_digit = soundex_digit(first);
        for c in letters {
            if code.len() == 4 {
                break;
            }
            let digit = soundex_digit(c);
            if let Some(d) = digit {
                if Some(d) != last_digit {
                    code.push((b'0' + d) as char);
                }
            }
            // H and W don't break a run of the same digit across them (e.g.
            // "Ashcraft"); any other non-coded letter does.
            if !matches!(c.to_ascii_uppercase(), 'H' | 'W') {
                last_digit = digit;
            }
        }
        while code.len() < 4 {
            code.push('0');
        }
        code
    }

    fn to_sql_param(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Boolean(b) => SqlValue::Integer(*b as i64),
            Value::Int8(v) => SqlValue::Integer(*v as i64),
            Value::Int16(v) => SqlValue::Integer(*v as i64),
            Value::Int32(v) => SqlValue::Integer(*v as i64),
            Value::Int64(v) => SqlValue::Integer(*v),
            Value::Float32(v) => SqlValue::Real(*v as f64),
            Value::Float64(v) => SqlValue::Real(*v),
            Value::Bytes(b) => SqlValue::Blob(b.clone()),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::BigInt(s) => SqlValue::Text(s.clone()),
            Value::BigDecimal(s) => SqlValue::Text(s.clone()),
            Value::Timestamp(t) => SqlValue::Text(t.to_rfc3339()),
            Value::Date(d) => SqlValue::Text(d.to_string()),
            Value::Enum(e) => SqlValue::Text(format!("{}-{}", e.ordinal, e.name)),
            Value::Collection(_) | Value::Map(_) => SqlValue::Text(value.to_string()),
        }
    }

    fn from_sql_column(row: &rusqlite::Row, index: usize) -> Result<Value> {
        let value_ref = row
            .get_ref(index)
            .map_err(|e| Error::storage_with_source("failed to read column", e))?;
        Ok(match value_ref.data_type() {
            SqlType::Null => Value::Null,
            SqlType::Integer => Value::Int64(value_ref.as_i64().unwrap_or_default()),
            SqlType::Real => Value::Float64(value_ref.as_f64().unwrap_or_default()),
            SqlType::Text => Value::String(value_ref.as_str().unwrap_or_default().to_string()),
            SqlType::Blob => Value::Bytes(value_ref.as_blob().unwrap_or_default().to_vec()),
        })
    }

    struct OwnedRow {
        values: Vec<Value>,
    }

    impl Row for OwnedRow {
        fn get(&self, index: usize) -> Result<Value> {
            self.values
                .get(index)
                .cloned()
                .ok_or_else(|| Error::mapping(format!("column index {index} out of range")))
        }
        fn len(&self) -> usize {
            self.values.len()
        }
    }

    /// Materializes the whole result set eagerly: `rusqlite` statements
    /// can't outlive the connection borrow cleanly behind our trait object,
    /// so the cursor here is a simple `Vec`-backed iterator rather than a
    /// true streaming cursor. Positioning support is left to richer drivers.
    struct VecCursor {
        rows: std::vec::IntoIter<OwnedRow>,
    }

    impl Cursor for VecCursor {
        fn next_row(&mut self) -> Result<Option<Box<dyn Row>>> {
            Ok(self.rows.next().map(|r| Box::new(r) as Box<dyn Row>))
        }
    }

    fn bind_values(values: &[Value]) -> Vec<SqlValue> {
        values.iter().map(to_sql_param).collect()
    }

    impl Connection for SqliteConnection {
        fn query(&mut self, compiled: &CompiledQuery) -> Result<Box<dyn Cursor + '_>> {
            let mut statement = self
                .inner
                .prepare(&compiled.sql)
                .map_err(|e| Error::storage_with_source("failed to prepare query", e))?;
            let bound = bind_values(&compiled.compare_values);
            let column_count = statement.column_count();
            let rows = statement
                .query_map(params_from_iter(bound.iter().map(|v| v as &dyn ToSql)), |row| {
                    let mut values = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        values.push(
                            from_sql_column(row, i)
                                .map_err(|_| rusqlite::Error::InvalidColumnIndex(i))?,
                        );
                    }
                    Ok(OwnedRow { values })
                })
                .map_err(|e| Error::storage_with_source("failed to execute query", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage_with_source("failed to read result rows", e))?;
            Ok(Box::new(VecCursor { rows: rows.into_iter() }))
        }

        fn execute(&mut self, template: &WriteTemplate, values: &[Value]) -> Result<u64> {
            let bound = bind_values(values);
            let affected = self
                .inner
                .execute(&template.sql, params_from_iter(bound.iter().map(|v| v as &dyn ToSql)))
                .map_err(|e| Error::storage_with_source("failed to execute statement", e))?;
            Ok(affected as u64)
        }

        fn execute_insert(&mut self, template: &WriteTemplate, values: &[Value]) -> Result<Option<Value>> {
            self.execute(template, values)?;
            Ok(Some(Value::Int64(self.inner.last_insert_rowid())))
        }

        fn execute_ddl(&mut self, sql: &str) -> Result<()> {
            self.inner
                .execute_batch(sql)
                .map_err(|e| Error::storage_with_source("failed to execute DDL", e))
        }

        fn begin_transaction(&mut self) -> Result<()> {
            self.inner
                .execute_batch("BEGIN")
                .map_err(|e| Error::storage_with_source("failed to begin transaction", e))
        }

        fn commit(&mut self) -> Result<()> {
            self.inner
                .execute_batch("COMMIT")
                .map_err(|e| Error::storage_with_source("failed to commit", e))
        }

        fn rollback(&mut self) -> Result<()> {
            self.inner
                .execute_batch("ROLLBACK")
                .map_err(|e| Error::storage_with_source("failed to roll back", e))
        }

        fn is_valid(&self) -> bool {
            self.inner.execute_batch("SELECT 1").is_ok()
        }
    }

    /// Opens a fresh `rusqlite::Connection` per call. SQLite connections
    /// are cheap enough (and non-`Sync`) that pooling is left to the host;
    /// `StorageManager`'s per-thread handle cache already avoids reopening
    /// on every query.
    pub enum SqliteTarget {
        File(PathBuf),
        Memory,
    }

    pub struct SqliteConnectionFactory {
        target: SqliteTarget,
    }

    impl SqliteConnectionFactory {
        pub fn file(path: impl Into<PathBuf>) -> Self {
            SqliteConnectionFactory {
                target: SqliteTarget::File(path.into()),
            }
        }

        pub fn in_memory() -> Self {
            SqliteConnectionFactory {
                target: SqliteTarget::Memory,
            }
        }
    }

    impl ConnectionFactory for SqliteConnectionFactory {
        fn open(&self) -> Result<Box<dyn Connection>> {
            let conn = match &self.target {
                SqliteTarget::File(path) => SqliteConnection::open(path)?,
                SqliteTarget::Memory => SqliteConnection::open_in_memory()?,
            };
            Ok(Box::new(conn))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn in_memory_connection_round_trips_a_row() {
            let mut conn = SqliteConnection::open_in_memory().unwrap();
            conn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
                .unwrap();
            let template = WriteTemplate {
                sql: "INSERT INTO t (name) VALUES (?)".to_string(),
                attributes: Vec::new(),
                child_counts: Vec::new(),
                id_attribute: None,
            };
            let id = conn
                .execute_insert(&template, &[Value::String("ada".into())])
                .unwrap();
            assert_eq!(id, Some(Value::Int64(1)));

            let compiled = CompiledQuery {
                sql: "SELECT id, name FROM t".to_string(),
                compare_attributes: Vec::new(),
                compare_values: Vec::new(),
                order_by: String::new(),
            };
            let mut cursor = conn.query(&compiled).unwrap();
            let row = cursor.next_row().unwrap().unwrap();
            assert_eq!(row.get(1).unwrap(), Value::String("ada".into()));
        }

        #[test]
        fn rolled_back_insert_is_not_visible() {
            let mut conn = SqliteConnection::open_in_memory().unwrap();
            conn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
                .unwrap();
            conn.begin_transaction().unwrap();
            let template = WriteTemplate {
                sql: "INSERT INTO t (name) VALUES (?)".to_string(),
                attributes: Vec::new(),
                child_counts: Vec::new(),
                id_attribute: None,
            };
            conn.execute(&template, &[Value::String("rolled-back".into())]).unwrap();
            conn.rollback().unwrap();

            let compiled = CompiledQuery {
                sql: "SELECT id FROM t".to_string(),
                compare_attributes: Vec::new(),
                compare_values: Vec::new(),
                order_by: String::new(),
            };
            let mut cursor = conn.query(&compiled).unwrap();
            assert!(cursor.next_row().unwrap().is_none());
        }

        #[test]
        fn soundex_matches_same_sounding_names_case_insensitively() {
            assert_eq!(soundex_code("Jones"), soundex_code("jones"));
            assert_eq!(soundex_code("Robert"), "R163");
            assert_eq!(soundex_code("Rupert"), "R163");
            assert_ne!(soundex_code("Robert"), soundex_code("Rubin"));
        }

        #[test]
        fn soundex_function_is_registered_on_the_connection() {
            let conn = SqliteConnection::open_in_memory().unwrap();
            let code: String = conn
                .inner
                .query_row("SELECT soundex('Jones')", [], |row| row.get(0))
                .unwrap();
            assert_eq!(code, "J520");
        }
    }
}
