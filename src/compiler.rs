//! The SQL compiler (component C, §4.3): lowers a `Criteria` tree and an
//! `ObjectMapping` into parameterized SQL text plus the ordered attribute/
//! value vectors a caller binds against a prepared statement.
//!
//! Compilation never touches a connection; it is pure text generation over
//! the mapping metadata and the dialect's configured knobs.

use std::sync::Arc;

use crate::dialect::DialectParams;
use crate::error::{Error, Result};
use crate::mapping::{camel_to_snake, AttributeDescriptor, MappingResolver, ObjectMapping};
use crate::predicate::{ComparisonOp, Criteria, ElementTarget, FunctionKind, JoinOp, QueryPredicate, SubQueryKind};
use crate::value::{Datatype, Value};

/// The outcome of compiling a predicate into a `SELECT`: the SQL text and
/// the positional bind values in the order they appear in the WHERE clause.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub compare_attributes: Vec<AttributeDescriptor>,
    pub compare_values: Vec<Value>,
    /// The rendered `ORDER BY ...` fragment, or empty if the predicate
    /// carried no sort keys.
    pub order_by: String,
}

/// A reusable template for writing one row. Bind order is `attributes`,
/// then one count per `child_counts` (the `_cc_<table>` columns, §6), then
/// `id_attribute` last if present (the `WHERE id = ?` of an UPDATE/DELETE;
/// `None` for an INSERT, where the id is just another column).
#[derive(Debug, Clone)]
pub struct WriteTemplate {
    pub sql: String,
    pub attributes: Vec<AttributeDescriptor>,
    pub child_counts: Vec<Arc<dyn ObjectMapping>>,
    pub id_attribute: Option<AttributeDescriptor>,
}

/// The DDL statements `init_object_storage` issues for a mapping (§4.5).
#[derive(Debug, Clone)]
pub struct CreateTableStatements {
    pub create_table: String,
    pub indexes: Vec<String>,
}

struct CompileContext<'a> {
    resolver: &'a dyn MappingResolver,
    dialect: &'a DialectParams,
    compare_attributes: Vec<AttributeDescriptor>,
    compare_values: Vec<Value>,
    sort_keys: Vec<(String, bool)>,
}

impl<'a> CompileContext<'a> {
    fn new(resolver: &'a dyn MappingResolver, dialect: &'a DialectParams) -> Self {
        CompileContext {
            resolver,
            dialect,
            compare_attributes: Vec::new(),
            compare_values: Vec::new(),
            sort_keys: Vec::new(),
        }
    }
}

/// The quoted table name for a mapping, per its dialect's identifier quote.
pub fn quoted_table_name(mapping: &dyn ObjectMapping, dialect: &DialectParams) -> String {
    format!("{q}{t}{q}", q = dialect.identifier_quote, t = mapping.table_name())
}

/// The integer column appended to a parent's row to cache a child
/// collection's size (§6 "Child-count column").
pub fn child_count_column_name(child_mapping: &dyn ObjectMapping) -> String {
    format!("_cc_{}", child_mapping.table_name())
}

/// Lowers a full query predicate into a `SELECT` over `mapping`'s table,
/// honoring the mapping's own `default_criteria` (if any), its sort keys and
/// paging.
pub fn compile_select(
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    dialect: &DialectParams,
) -> Result<CompiledQuery> {
    let mut ctx = CompileContext::new(resolver, dialect);
    let criteria = with_default_criteria(mapping, &predicate.criteria);
    let where_text = compile_criteria(&mut ctx, mapping, &criteria)?;

    let mut select_list: Vec<String> = mapping
        .attributes()
        .iter()
        .map(|a| a.quoted_sql_name(dialect))
        .collect();
    if !mapping.disable_child_counts() {
        select_list.extend(
            mapping
                .child_mappings()
                .iter()
                .map(|c| quoted_identifier(dialect, &child_count_column_name(c.mapping.as_ref()))),
        );
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list.join(", "),
        quoted_table_name(mapping, dialect)
    );
    if let Some(where_text) = &where_text {
        sql.push_str(" WHERE ");
        sql.push_str(where_text);
    }
    let order_by = render_order_by(&ctx.sort_keys);
    if !order_by.is_empty() {
        sql.push(' ');
        sql.push_str(&order_by);
    }
    append_paging(&mut sql, dialect, predicate.offset, predicate.limit);

    Ok(CompiledQuery {
        sql,
        compare_attributes: ctx.compare_attributes,
        compare_values: ctx.compare_values,
        order_by,
    })
}

/// Lowers a predicate into `SELECT COUNT(*)`, used by `Query::size` (§4.4).
pub fn compile_count(
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    dialect: &DialectParams,
) -> Result<CompiledQuery> {
    let mut ctx = CompileContext::new(resolver, dialect);
    let criteria = with_default_criteria(mapping, &predicate.criteria);
    let where_text = compile_criteria(&mut ctx, mapping, &criteria)?;
    let mut sql = format!("SELECT COUNT(*) FROM {}", quoted_table_name(mapping, dialect));
    if let Some(where_text) = &where_text {
        sql.push_str(" WHERE ");
        sql.push_str(where_text);
    }
    Ok(CompiledQuery {
        sql,
        compare_attributes: ctx.compare_attributes,
        compare_values: ctx.compare_values,
        order_by: String::new(),
    })
}

/// Lowers a predicate into `SELECT DISTINCT <attr>`, used by `Query::get_distinct` (§4.4).
pub fn compile_distinct(
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    attr: &AttributeDescriptor,
    dialect: &DialectParams,
) -> Result<CompiledQuery> {
    let mut ctx = CompileContext::new(resolver, dialect);
    let criteria = with_default_criteria(mapping, &predicate.criteria);
    let where_text = compile_criteria(&mut ctx, mapping, &criteria)?;
    let mut sql = format!(
        "SELECT DISTINCT {} FROM {}",
        attr.quoted_sql_name(dialect),
        quoted_table_name(mapping, dialect)
    );
    if let Some(where_text) = &where_text {
        sql.push_str(" WHERE ");
        sql.push_str(where_text);
    }
    let order_by = render_order_by(&ctx.sort_keys);
    if !order_by.is_empty() {
        sql.push(' ');
        sql.push_str(&order_by);
    }
    Ok(CompiledQuery {
        sql,
        compare_attributes: ctx.compare_attributes,
        compare_values: ctx.compare_values,
        order_by,
    })
}

/// The 1-based position of `id_value` within the row order a predicate would
/// produce, via `row_number() OVER (...)` (§4.4). Callers fall back to -1
/// when the dialect doesn't support window functions (`Ok(None)` here).
pub fn compile_position_of_id(
    resolver: &dyn MappingResolver,
    mapping: &dyn ObjectMapping,
    predicate: &QueryPredicate,
    dialect: &DialectParams,
) -> Result<Option<CompiledQuery>> {
    if !dialect.supports_window_functions {
        return Ok(None);
    }
    let mut ctx = CompileContext::new(resolver, dialect);
    let criteria = with_default_criteria(mapping, &predicate.criteria);
    let where_text = compile_criteria(&mut ctx, mapping, &criteria)?;
    let id_col = mapping.id_attribute().quoted_sql_name(dialect);
    let order_by = if ctx.sort_keys.is_empty() {
        id_col.clone()
    } else {
        render_order_by(&ctx.sort_keys)
            .trim_start_matches("ORDER BY ")
            .to_string()
    };
    let mut inner_sql = format!(
        "SELECT {id_col}, row_number() OVER (ORDER BY {order_by}) AS rn FROM {}",
        quoted_table_name(mapping, dialect)
    );
    if let Some(where_text) = &where_text {
        inner_sql.push_str(" WHERE ");
        inner_sql.push_str(where_text);
    }
    let sql = format!("SELECT rn FROM ({inner_sql}) t WHERE {id_col} = ?");

    // The id attribute is reported so the caller knows which attribute's
    // `map_value` to apply to the id it binds; the bind value itself is
    // supplied by the caller at execution time, not baked in here.
    Ok(Some(CompiledQuery {
        sql,
        compare_attributes: vec![mapping.id_attribute().clone()],
        compare_values: Vec::new(),
        order_by: String::new(),
    }))
}

fn child_count_mappings(mapping: &dyn ObjectMapping) -> Vec<Arc<dyn ObjectMapping>> {
    if mapping.disable_child_counts() {
        Vec::new()
    } else {
        mapping.child_mappings().iter().map(|c| c.mapping.clone()).collect()
    }
}

/// `INSERT INTO table (cols..., _cc_...) VALUES (?, ...)`, attributes in
/// bind order followed by one placeholder per child-count column (§6). The
/// autogenerated id column, if any, is omitted (§4.5).
pub fn compile_insert(mapping: &dyn ObjectMapping, dialect: &DialectParams) -> WriteTemplate {
    let attributes: Vec<AttributeDescriptor> = mapping
        .attributes()
        .iter()
        .filter(|a| !(a.id && a.autogenerated))
        .cloned()
        .collect();
    let child_counts = child_count_mappings(mapping);
    let mut columns: Vec<String> = attributes.iter().map(|a| a.quoted_sql_name(dialect)).collect();
    columns.extend(child_counts.iter().map(|c| quoted_identifier(dialect, &child_count_column_name(c.as_ref()))));
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted_table_name(mapping, dialect),
        columns.join(", "),
        placeholders.join(", ")
    );
    WriteTemplate {
        sql,
        attributes,
        child_counts,
        id_attribute: None,
    }
}

/// `UPDATE table SET col = ?, ..., _cc_... = ? WHERE id = ?`.
pub fn compile_update(mapping: &dyn ObjectMapping, dialect: &DialectParams) -> WriteTemplate {
    let id = mapping.id_attribute();
    let attributes: Vec<AttributeDescriptor> = mapping
        .attributes()
        .iter()
        .filter(|a| !a.id)
        .cloned()
        .collect();
    let child_counts = child_count_mappings(mapping);
    let mut assignments: Vec<String> = attributes
        .iter()
        .map(|a| format!("{} = ?", a.quoted_sql_name(dialect)))
        .collect();
    assignments.extend(
        child_counts
            .iter()
            .map(|c| format!("{} = ?", quoted_identifier(dialect, &child_count_column_name(c.as_ref())))),
    );
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quoted_table_name(mapping, dialect),
        assignments.join(", "),
        id.quoted_sql_name(dialect)
    );
    WriteTemplate {
        sql,
        attributes,
        child_counts,
        id_attribute: Some(id.clone()),
    }
}

/// `DELETE FROM table WHERE id = ?`.
pub fn compile_delete(mapping: &dyn ObjectMapping, dialect: &DialectParams) -> WriteTemplate {
    let id = mapping.id_attribute();
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quoted_table_name(mapping, dialect),
        id.quoted_sql_name(dialect)
    );
    WriteTemplate {
        sql,
        attributes: Vec::new(),
        child_counts: Vec::new(),
        id_attribute: Some(id.clone()),
    }
}

/// `CREATE TABLE IF NOT EXISTS` for a mapping plus its index statements
/// (§4.5 "init_object_storage"). Honors `mapping.disable_child_counts()` by
/// dropping the trailing cached-size columns for hosts that never query
/// child sizes eagerly.
pub fn compile_create_table(mapping: &dyn ObjectMapping, dialect: &DialectParams) -> CreateTableStatements {
    let table = quoted_table_name(mapping, dialect);
    let mut columns = Vec::new();
    let mut foreign_keys = Vec::new();

    for attr in mapping.attributes() {
        let mut col = format!("{} {}", attr.quoted_sql_name(dialect), column_sql_datatype(attr, dialect));
        if attr.unique && !attr.id {
            col.push_str(" UNIQUE");
        }
        if attr.mandatory {
            col.push_str(" NOT NULL");
        }
        columns.push(col);

        if (attr.parent || attr.reference) && !attr.id {
            if let Some(referenced_type) = &attr.references_type {
                let referenced_table = quoted_identifier(dialect, &camel_to_snake(referenced_type));
                foreign_keys.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {referenced_table}",
                    attr.quoted_sql_name(dialect)
                ));
            }
        }
    }
    columns.push(format!("PRIMARY KEY ({})", mapping.id_attribute().quoted_sql_name(dialect)));
    columns.extend(foreign_keys);

    if !mapping.disable_child_counts() {
        for child in mapping.child_mappings() {
            columns.push(format!(
                "{} INTEGER",
                quoted_identifier(dialect, &child_count_column_name(child.mapping.as_ref()))
            ));
        }
    }

    let create_table = format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "));
    let indexes = mapping
        .attributes()
        .iter()
        .filter(|a| a.indexed)
        .map(|a| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {table} ({})",
                mapping.table_name(),
                a.sql_name(),
                a.quoted_sql_name(dialect)
            )
        })
        .collect();

    CreateTableStatements { create_table, indexes }
}

fn with_default_criteria(mapping: &dyn ObjectMapping, criteria: &Criteria) -> Criteria {
    match mapping.default_criteria() {
        Some(default) => default.and(criteria.clone()),
        None => criteria.clone(),
    }
}

fn quoted_identifier(dialect: &DialectParams, name: &str) -> String {
    format!("{q}{name}{q}", q = dialect.identifier_quote)
}

fn column_sql_datatype(attr: &AttributeDescriptor, dialect: &DialectParams) -> String {
    if attr.id && attr.autogenerated {
        dialect.auto_id_sql.clone()
    } else {
        dialect.sql_datatype(&attr.datatype)
    }
}

fn render_order_by(sort_keys: &[(String, bool)]) -> String {
    if sort_keys.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = sort_keys
        .iter()
        .map(|(col, ascending)| {
            if *ascending {
                col.clone()
            } else {
                format!("{col} DESC")
            }
        })
        .collect();
    format!("ORDER BY {}", parts.join(", "))
}

fn append_paging(sql: &mut String, dialect: &DialectParams, offset: u64, limit: Option<u64>) {
    if offset > 0 {
        if let Some(template) = &dialect.paging.offset {
            sql.push(' ');
            sql.push_str(&template.replace("%d", &offset.to_string()));
        }
    }
    if let Some(limit) = limit {
        if let Some(template) = &dialect.paging.limit {
            sql.push(' ');
            sql.push_str(&template.replace("%d", &limit.to_string()));
        }
    }
}

/// Combines two already-compiled join sides: a side that contributed no
/// text (e.g. an `AlwaysTrue` leaf) is dropped rather than emitting an empty
/// operand, so `WHERE` is only ever prefixed when something contributes
/// (§4.3 "WHERE is only prefixed if something contributes").
fn combine_join(op: JoinOp, left: Option<String>, right: Option<String>) -> Option<String> {
    match (left, right) {
        (Some(l), Some(r)) => {
            let connective = match op {
                JoinOp::And => "AND",
                JoinOp::Or => "OR",
            };
            Some(format!("({l} {connective} {r})"))
        }
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

fn resolve_attribute(mapping: &dyn ObjectMapping, target: &ElementTarget) -> Result<AttributeDescriptor> {
    match target {
        ElementTarget::Field(name) => mapping
            .attributes()
            .iter()
            .find(|a| a.field_name == *name)
            .cloned()
            .ok_or_else(|| Error::mapping(format!("no attribute named {name:?} on {}", mapping.type_name()))),
        ElementTarget::Attribute(attr) => Ok(attr.clone()),
        ElementTarget::Function(_, inner) => resolve_attribute(mapping, inner),
    }
}

fn resolve_target_sql(
    ctx: &mut CompileContext,
    mapping: &dyn ObjectMapping,
    target: &ElementTarget,
) -> Result<String> {
    match target {
        ElementTarget::Field(name) => {
            let attr = mapping
                .attributes()
                .iter()
                .find(|a| a.field_name == *name)
                .ok_or_else(|| Error::mapping(format!("no attribute named {name:?} on {}", mapping.type_name())))?;
            Ok(attr.quoted_sql_name(ctx.dialect))
        }
        ElementTarget::Attribute(attr) => Ok(attr.quoted_sql_name(ctx.dialect)),
        ElementTarget::Function(call, inner) => {
            let inner_sql = resolve_target_sql(ctx, mapping, inner)?;
            Ok(apply_function_sql(ctx.dialect, call, &inner_sql))
        }
    }
}

fn apply_function_sql(dialect: &DialectParams, call: &FunctionKind, column_sql: &str) -> String {
    match call {
        FunctionKind::Lower => format!("LOWER({column_sql})"),
        FunctionKind::Upper => format!("UPPER({column_sql})"),
        FunctionKind::Cast(datatype) => {
            format!("CAST({column_sql} AS {})", dialect.sql_datatype(datatype))
        }
        FunctionKind::Substring { begin, end } => {
            // SQL SUBSTRING is 1-based and takes a length, not an end index.
            format!("SUBSTRING({column_sql}, {}, {})", begin + 1, end.saturating_sub(*begin))
        }
        FunctionKind::Chain(calls) => {
            let mut sql = column_sql.to_string();
            for call in calls.iter().rev() {
                sql = apply_function_sql(dialect, call, &sql);
            }
            sql
        }
    }
}

/// Recursively compiles a full predicate tree (the top-level shape, where
/// `Join`/`Not` compose whole sub-predicates rather than value-predicates
/// scoped to one column).
fn compile_criteria(ctx: &mut CompileContext, mapping: &dyn ObjectMapping, criteria: &Criteria) -> Result<Option<String>> {
    match criteria {
        Criteria::AlwaysTrue => Ok(None),
        Criteria::SortKey { target, ascending } => {
            let sql = resolve_target_sql(ctx, mapping, target)?;
            ctx.sort_keys.push((sql, *ascending));
            Ok(None)
        }
        Criteria::Element { target, inner } => {
            if matches!(inner.as_ref(), Criteria::AlwaysTrue) {
                return Ok(None);
            }
            if let Criteria::SubQuery { type_name, kind, inner: sub_inner } = inner.as_ref() {
                // `has_child`'s target names the collection attribute, not a
                // real column — `compile_subquery`'s `Child` arm correlates
                // on the outer id itself and ignores `outer_column_sql`, so
                // only `Reference` (whose target is a real attribute) needs
                // it resolved here.
                let column_sql = match kind {
                    SubQueryKind::Child => mapping.id_attribute().quoted_sql_name(ctx.dialect),
                    SubQueryKind::Reference { .. } => resolve_target_sql(ctx, mapping, target)?,
                };
                return compile_subquery(ctx, mapping, &column_sql, type_name, kind, sub_inner).map(Some);
            }
            let attr = resolve_attribute(mapping, target)?;
            let column_sql = resolve_target_sql(ctx, mapping, target)?;
            compile_value_predicate(ctx, mapping, &column_sql, &attr, inner)
        }
        Criteria::Function { inner, .. } => {
            // A bare function predicate with no enclosing attribute has no
            // column to wrap; fall through so composition still sees the
            // inner criteria rather than silently vanishing.
            compile_criteria(ctx, mapping, inner)
        }
        Criteria::Join { op, left, right } => {
            let l = compile_criteria(ctx, mapping, left)?;
            let r = compile_criteria(ctx, mapping, right)?;
            Ok(combine_join(*op, l, r))
        }
        Criteria::Not(inner) => {
            if let Criteria::Not(double) = inner.as_ref() {
                return compile_criteria(ctx, mapping, double);
            }
            // A bare Comparison has no column at this scope; nothing to fold.
            if matches!(inner.as_ref(), Criteria::Comparison(_, _)) {
                return Ok(None);
            }
            let compiled = compile_criteria(ctx, mapping, inner)?;
            Ok(compiled.map(|text| format!("NOT ({text})")))
        }
        Criteria::Comparison(_, _) => Ok(None),
        Criteria::SubQuery { type_name, kind, inner } => {
            let id_col = mapping.id_attribute().quoted_sql_name(ctx.dialect);
            compile_subquery(ctx, mapping, &id_col, type_name, kind, inner).map(Some)
        }
    }
}

/// Compiles a predicate already scoped to one column (`column_sql`): a
/// comparison, a boolean combination of comparisons against the same
/// column, a function wrapping the column, or a sub-query narrowing it.
fn compile_value_predicate(
    ctx: &mut CompileContext,
    mapping: &dyn ObjectMapping,
    column_sql: &str,
    attr: &AttributeDescriptor,
    criteria: &Criteria,
) -> Result<Option<String>> {
    match criteria {
        Criteria::AlwaysTrue => Ok(None),
        Criteria::Comparison(op, value) => Ok(Some(compile_comparison(ctx, column_sql, attr, *op, value))),
        Criteria::Not(inner) => {
            if let Criteria::Not(double) = inner.as_ref() {
                return compile_value_predicate(ctx, mapping, column_sql, attr, double);
            }
            if let Criteria::Comparison(op, value) = inner.as_ref() {
                if op.is_foldable() {
                    return Ok(Some(compile_comparison(ctx, column_sql, attr, op.negate(), value)));
                }
                let compiled = compile_comparison(ctx, column_sql, attr, *op, value);
                return Ok(Some(format!("NOT ({compiled})")));
            }
            let compiled = compile_value_predicate(ctx, mapping, column_sql, attr, inner)?;
            Ok(compiled.map(|text| format!("NOT ({text})")))
        }
        Criteria::Join { op, left, right } => {
            let l = compile_value_predicate(ctx, mapping, column_sql, attr, left)?;
            let r = compile_value_predicate(ctx, mapping, column_sql, attr, right)?;
            Ok(combine_join(*op, l, r))
        }
        Criteria::Function { call, inner } => {
            let wrapped = apply_function_sql(ctx.dialect, call, column_sql);
            compile_value_predicate(ctx, mapping, &wrapped, attr, inner)
        }
        Criteria::SubQuery { type_name, kind, inner } => {
            compile_subquery(ctx, mapping, column_sql, type_name, kind, inner).map(Some)
        }
        Criteria::SortKey { .. } | Criteria::Element { .. } => Ok(None),
    }
}

fn compile_comparison(
    ctx: &mut CompileContext,
    column_sql: &str,
    attr: &AttributeDescriptor,
    op: ComparisonOp,
    value: &Value,
) -> String {
    if value.is_null() {
        return match op {
            ComparisonOp::Eq => format!("{column_sql} IS NULL"),
            ComparisonOp::Ne => format!("{column_sql} IS NOT NULL"),
            _ => format!("{column_sql} IS NULL"),
        };
    }
    match op {
        ComparisonOp::In => {
            let items = match value {
                Value::Collection(items) => items.clone(),
                other => vec![other.clone()],
            };
            if items.is_empty() {
                // An empty IN-list can never match; no parameters to bind.
                return "1 = 0".to_string();
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            for item in items {
                ctx.compare_attributes.push(attr.clone());
                ctx.compare_values.push(item);
            }
            format!("{column_sql} IN ({placeholders})")
        }
        ComparisonOp::Like => {
            ctx.compare_attributes.push(attr.clone());
            ctx.compare_values.push(value.clone());
            format!("{column_sql} LIKE ?")
        }
        ComparisonOp::SimilarTo => {
            ctx.compare_attributes.push(attr.clone());
            ctx.compare_values.push(value.clone());
            let f = &ctx.dialect.fuzzy_function;
            format!("{f}({column_sql}) = {f}(?)")
        }
        _ => {
            let token = match op {
                ComparisonOp::Eq => "=",
                ComparisonOp::Ne => "<>",
                ComparisonOp::Lt => "<",
                ComparisonOp::Le => "<=",
                ComparisonOp::Gt => ">",
                ComparisonOp::Ge => ">=",
                ComparisonOp::In | ComparisonOp::Like | ComparisonOp::SimilarTo => unreachable!(),
            };
            ctx.compare_attributes.push(attr.clone());
            ctx.compare_values.push(value.clone());
            format!("{column_sql} {token} ?")
        }
    }
}

/// Lowers `has_child`/`refers_to` to `col IN (SELECT ref_col FROM child_table WHERE ...)`
/// (§4.3 "Sub-queries").
fn compile_subquery(
    ctx: &mut CompileContext,
    outer_mapping: &dyn ObjectMapping,
    outer_column_sql: &str,
    type_name: &str,
    kind: &SubQueryKind,
    inner: &Criteria,
) -> Result<String> {
    let child_mapping: Arc<dyn ObjectMapping> = ctx.resolver.resolve(type_name)?;

    let (outer_sql, inner_id_col) = match kind {
        SubQueryKind::Child => {
            let parent_attr = child_mapping
                .parent_attribute(outer_mapping.type_name())
                .ok_or_else(|| {
                    Error::mapping(format!(
                        "{type_name} has no parent attribute pointing back at {}",
                        outer_mapping.type_name()
                    ))
                })?;
            (
                outer_mapping.id_attribute().quoted_sql_name(ctx.dialect),
                parent_attr.quoted_sql_name(ctx.dialect),
            )
        }
        SubQueryKind::Reference { accessor } => {
            if let Some(parent_attr) = child_mapping.parent_attribute(outer_mapping.type_name()) {
                (outer_column_sql.to_string(), parent_attr.quoted_sql_name(ctx.dialect))
            } else if let Some(accessor_target) = accessor {
                let accessor_attr = resolve_attribute(child_mapping.as_ref(), accessor_target)?;
                (outer_column_sql.to_string(), accessor_attr.quoted_sql_name(ctx.dialect))
            } else {
                (
                    outer_column_sql.to_string(),
                    child_mapping.id_attribute().quoted_sql_name(ctx.dialect),
                )
            }
        }
    };

    let table = quoted_table_name(child_mapping.as_ref(), ctx.dialect);
    let mut inner_ctx = CompileContext::new(ctx.resolver, ctx.dialect);
    let inner_sql = compile_criteria(&mut inner_ctx, child_mapping.as_ref(), inner)?;

    // Splice the sub-query's own bind parameters in after the outer ones
    // accumulated so far, preserving left-to-right appearance order.
    ctx.compare_attributes.extend(inner_ctx.compare_attributes);
    ctx.compare_values.extend(inner_ctx.compare_values);

    let where_clause = match inner_sql {
        Some(text) => format!(" WHERE {text}"),
        None => String::new(),
    };
    Ok(format!(
        "{outer_sql} IN (SELECT {inner_id_col} FROM {table}{where_clause})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ChildMapping;
    use std::any::Any;

    struct StubMapping {
        type_name: &'static str,
        attributes: Vec<AttributeDescriptor>,
        children: Vec<ChildMapping>,
        parent_of: Option<(&'static str, AttributeDescriptor)>,
    }

    impl ObjectMapping for StubMapping {
        fn type_name(&self) -> &str {
            self.type_name
        }
        fn attributes(&self) -> &[AttributeDescriptor] {
            &self.attributes
        }
        fn id_attribute(&self) -> &AttributeDescriptor {
            self.attributes.iter().find(|a| a.id).unwrap()
        }
        fn parent_attribute(&self, parent_type: &str) -> Option<&AttributeDescriptor> {
            self.parent_of
                .as_ref()
                .filter(|(t, _)| *t == parent_type)
                .map(|(_, a)| a)
        }
        fn child_mappings(&self) -> &[ChildMapping] {
            &self.children
        }
        fn get_value(&self, _: &dyn Any, _: &AttributeDescriptor) -> Result<Value> {
            Ok(Value::Null)
        }
        fn set_value(&self, _: &mut dyn Any, _: &AttributeDescriptor, _: Value) -> Result<()> {
            Ok(())
        }
        fn get_children(&self, _: &dyn Any, _: &ChildMapping) -> Result<Vec<crate::mapping::ObjectBox>> {
            Ok(Vec::new())
        }
        fn set_children(&self, _: &mut dyn Any, _: Vec<crate::mapping::ObjectBox>, _: &ChildMapping) -> Result<()> {
            Ok(())
        }
        fn init_children(&self, _: &Value, _: &mut [crate::mapping::ObjectBox], _: &ChildMapping) -> Result<()> {
            Ok(())
        }
        fn create_object(&self, _: Vec<Value>, _: bool) -> Result<crate::mapping::ObjectBox> {
            Err(Error::unsupported("stub"))
        }
        fn is_persistent(&self, _: &dyn Any) -> bool {
            false
        }
        fn set_persistent(&self, _: &mut dyn Any, _: bool) {}
        fn is_storing(&self, _: &dyn Any) -> bool {
            false
        }
        fn set_storing(&self, _: &mut dyn Any, _: bool) {}
    }

    struct EmptyResolver;
    impl MappingResolver for EmptyResolver {
        fn resolve(&self, type_name: &str) -> Result<Arc<dyn ObjectMapping>> {
            Err(Error::mapping(format!("no mapping for {type_name}")))
        }
    }

    fn person_mapping() -> StubMapping {
        StubMapping {
            type_name: "Person",
            attributes: vec![
                AttributeDescriptor::new("id", Datatype::Int64).id().autogenerated(),
                AttributeDescriptor::new("name", Datatype::String(None)),
                AttributeDescriptor::new("age", Datatype::Int32),
            ],
            children: Vec::new(),
            parent_of: None,
        }
    }

    #[test]
    fn where_omitted_when_predicate_is_always_true() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person");
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(!compiled.sql.contains("WHERE"));
    }

    #[test]
    fn equality_on_name_binds_one_value() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person")
            .with_criteria(Criteria::if_field("name", Criteria::equal_to(Value::String("Ada".into()))));
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(compiled.sql.contains("WHERE \"name\" = ?"));
        assert_eq!(compiled.compare_values, vec![Value::String("Ada".into())]);
    }

    #[test]
    fn negated_equality_folds_to_not_equal() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person").with_criteria(Criteria::if_field(
            "name",
            Criteria::equal_to(Value::String("Ada".into())).not(),
        ));
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(compiled.sql.contains("\"name\" <> ?"));
        assert!(!compiled.sql.contains("NOT ("));
    }

    #[test]
    fn double_negation_collapses() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let inner = Criteria::if_field("name", Criteria::equal_to(Value::String("Ada".into())));
        let predicate = QueryPredicate::for_type("Person").with_criteria(Criteria::Not(Box::new(Criteria::Not(
            Box::new(inner.clone()),
        ))));
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        let plain = compile_select(
            &resolver,
            &mapping,
            &QueryPredicate::for_type("Person").with_criteria(inner),
            &dialect,
        )
        .unwrap();
        assert_eq!(compiled.sql, plain.sql);
    }

    #[test]
    fn like_and_in_are_wrapped_not_folded() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person")
            .with_criteria(Criteria::if_field("name", Criteria::like("A%").not()));
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(compiled.sql.contains("NOT (\"name\" LIKE ?)"));
    }

    #[test]
    fn sort_key_contributes_order_by_not_where() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person")
            .with_criteria(Criteria::sort_by(ElementTarget::field("age"), false));
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(!compiled.sql.contains("WHERE"));
        assert_eq!(compiled.order_by, "ORDER BY \"age\" DESC");
    }

    #[test]
    fn paging_applies_offset_then_limit() {
        let mapping = person_mapping();
        let resolver = EmptyResolver;
        let dialect = DialectParams::default();
        let predicate = QueryPredicate::for_type("Person").with_offset(20).with_limit(10);
        let compiled = compile_select(&resolver, &mapping, &predicate, &dialect).unwrap();
        assert!(compiled.sql.ends_with("OFFSET 20 LIMIT 10"));
    }

    #[test]
    fn create_table_declares_primary_key_and_indexes() {
        let mut mapping = person_mapping();
        mapping.attributes[2] = mapping.attributes[2].clone().indexed();
        let dialect = DialectParams::default();
        let statements = compile_create_table(&mapping, &dialect);
        assert!(statements.create_table.contains("PRIMARY KEY (\"id\")"));
        assert_eq!(statements.indexes.len(), 1);
        assert!(statements.indexes[0].contains("\"age\""));
    }

    #[test]
    fn insert_omits_autogenerated_id() {
        let mapping = person_mapping();
        let dialect = DialectParams::default();
        let template = compile_insert(&mapping, &dialect);
        assert_eq!(template.attributes.len(), 2);
        assert!(!template.sql.contains("\"id\""));
    }

    #[test]
    fn update_binds_id_last_for_where_clause() {
        let mapping = person_mapping();
        let dialect = DialectParams::default();
        let template = compile_update(&mapping, &dialect);
        assert!(template.id_attribute.as_ref().unwrap().id);
        assert!(!template.attributes.iter().any(|a| a.id));
        assert!(template.sql.ends_with("WHERE \"id\" = ?"));
    }
}
