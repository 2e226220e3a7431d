//! The predicate algebra (component A): an immutable, structurally-equal
//! expression tree for query criteria, lowered to SQL by `compiler.rs` and
//! evaluatable in-memory against a live object via `Predicate::evaluate`.

use crate::mapping::{AttributeDescriptor, ObjectMapping};
use crate::value::{Datatype, Value};
use std::any::Any;

/// Comparison operators a `Comparison` leaf can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `element_of`; lowered to SQL `IN (...)`.
    In,
    Like,
    /// Triggers the dialect's configured fuzzy-match function.
    SimilarTo,
}

impl ComparisonOp {
    /// The operator that negates this one at a leaf (§4.1 "not folds over
    /// leaf comparisons").
    pub fn negate(self) -> ComparisonOp {
        match self {
            ComparisonOp::Eq => ComparisonOp::Ne,
            ComparisonOp::Ne => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::Ge,
            ComparisonOp::Ge => ComparisonOp::Lt,
            ComparisonOp::Le => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Le,
            // IN, LIKE and SIMILAR TO have no single-token negated SQL form;
            // the compiler instead prefixes " NOT " for these.
            other => other,
        }
    }

    /// Whether `negate` produced a genuinely different, still-leaf-foldable
    /// operator (used by the compiler to decide whether it must instead
    /// fall back to a `NOT (...)` wrapper).
    pub fn is_foldable(self) -> bool {
        matches!(
            self,
            ComparisonOp::Eq
                | ComparisonOp::Ne
                | ComparisonOp::Lt
                | ComparisonOp::Le
                | ComparisonOp::Gt
                | ComparisonOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOp {
    And,
    Or,
}

/// A known SQL function, as named in §4.3's "Function predicates".
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Lower,
    Upper,
    Cast(Datatype),
    Substring { begin: usize, end: usize },
    /// A chain of functions applied outermost-first.
    Chain(Vec<FunctionKind>),
}

/// The target an `Element`/`SortKey`/`Function` predicate applies to:
/// a field accessed by name, a resolved attribute descriptor, or a function
/// call over a nested target (§4.1 "attr-or-function").
#[derive(Debug, Clone, PartialEq)]
pub enum ElementTarget {
    Field(String),
    Attribute(AttributeDescriptor),
    Function(FunctionKind, Box<ElementTarget>),
}

impl ElementTarget {
    pub fn field(name: impl Into<String>) -> Self {
        ElementTarget::Field(name.into())
    }

    pub fn attribute(attr: AttributeDescriptor) -> Self {
        ElementTarget::Attribute(attr)
    }

    pub fn name(&self) -> &str {
        match self {
            ElementTarget::Field(name) => name,
            ElementTarget::Attribute(attr) => attr.field_name.as_str(),
            ElementTarget::Function(_, inner) => inner.name(),
        }
    }
}

/// How a sub-query predicate joins back to its enclosing type (§4.1
/// `has_child` vs `refers_to`).
#[derive(Debug, Clone, PartialEq)]
pub enum SubQueryKind {
    /// `has_child`: the inner type is a child mapping of the outer type.
    Child,
    /// `refers_to`: the inner type is referenced by a reference attribute;
    /// an optional accessor narrows which column on the referenced side is
    /// compared, in place of its id attribute.
    Reference { accessor: Option<ElementTarget> },
}

/// The criteria predicate tree (§3 "Criteria predicate").
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    AlwaysTrue,
    Comparison(ComparisonOp, Value),
    Element {
        target: ElementTarget,
        inner: Box<Criteria>,
    },
    Function {
        call: FunctionKind,
        inner: Box<Criteria>,
    },
    Join {
        op: JoinOp,
        left: Box<Criteria>,
        right: Box<Criteria>,
    },
    Not(Box<Criteria>),
    SortKey {
        target: ElementTarget,
        ascending: bool,
    },
    SubQuery {
        type_name: String,
        kind: SubQueryKind,
        inner: Box<Criteria>,
    },
}

impl Criteria {
    pub fn if_field(name: impl Into<String>, inner: Criteria) -> Self {
        Criteria::Element {
            target: ElementTarget::field(name),
            inner: Box::new(inner),
        }
    }

    pub fn if_attribute(attr: AttributeDescriptor, inner: Criteria) -> Self {
        Criteria::Element {
            target: ElementTarget::attribute(attr),
            inner: Box::new(inner),
        }
    }

    pub fn equal_to(value: Value) -> Self {
        Criteria::Comparison(ComparisonOp::Eq, value)
    }

    pub fn less_than(value: Value) -> Self {
        Criteria::Comparison(ComparisonOp::Lt, value)
    }

    pub fn less_or_equal(value: Value) -> Self {
        Criteria::Comparison(ComparisonOp::Le, value)
    }

    pub fn greater_than(value: Value) -> Self {
        Criteria::Comparison(ComparisonOp::Gt, value)
    }

    pub fn greater_or_equal(value: Value) -> Self {
        Criteria::Comparison(ComparisonOp::Ge, value)
    }

    pub fn element_of(values: Vec<Value>) -> Self {
        Criteria::Comparison(ComparisonOp::In, Value::Collection(values))
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        Criteria::Comparison(ComparisonOp::Like, Value::String(pattern.into()))
    }

    /// Triggers the dialect's configured fuzzy-match function (default
    /// `soundex`).
    pub fn similar_to(value: impl Into<String>) -> Self {
        Criteria::Comparison(ComparisonOp::SimilarTo, Value::String(value.into()))
    }

    pub fn and(self, other: Criteria) -> Self {
        Criteria::Join {
            op: JoinOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Criteria) -> Self {
        Criteria::Join {
            op: JoinOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// Folds a negation over a leaf comparison (negated op); for anything
    /// else, wraps it as an explicit `Not`. The compiler separately collapses
    /// `Not(Not(x))` when it encounters one constructed by other means.
    pub fn not(self) -> Self {
        match self {
            Criteria::Comparison(op, value) if op.is_foldable() => {
                Criteria::Comparison(op.negate(), value)
            }
            other => Criteria::Not(Box::new(other)),
        }
    }

    pub fn has_child(type_name: impl Into<String>, inner: Criteria) -> Self {
        Criteria::SubQuery {
            type_name: type_name.into(),
            kind: SubQueryKind::Child,
            inner: Box::new(inner),
        }
    }

    pub fn refers_to(type_name: impl Into<String>, inner: Criteria) -> Self {
        Criteria::SubQuery {
            type_name: type_name.into(),
            kind: SubQueryKind::Reference { accessor: None },
            inner: Box::new(inner),
        }
    }

    pub fn refers_to_via(
        type_name: impl Into<String>,
        accessor: ElementTarget,
        inner: Criteria,
    ) -> Self {
        Criteria::SubQuery {
            type_name: type_name.into(),
            kind: SubQueryKind::Reference {
                accessor: Some(accessor),
            },
            inner: Box::new(inner),
        }
    }

    pub fn sort_by(target: ElementTarget, ascending: bool) -> Self {
        Criteria::SortKey { target, ascending }
    }

    pub fn function(call: FunctionKind, inner: Criteria) -> Self {
        Criteria::Function {
            call,
            inner: Box::new(inner),
        }
    }
}

/// A root predicate carrying a type and a criteria tree (§3 "Query
/// predicate"). Depth/offset/limit are the per-query relations of §6.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPredicate {
    pub type_name: String,
    pub criteria: Criteria,
    /// `None` is the unbounded sentinel (§6 "query depth (unbounded
    /// sentinel)").
    pub depth: Option<u32>,
    pub offset: u64,
    pub limit: Option<u64>,
    pub is_child_query: bool,
}

impl QueryPredicate {
    pub fn for_type(type_name: impl Into<String>) -> Self {
        QueryPredicate {
            type_name: type_name.into(),
            criteria: Criteria::AlwaysTrue,
            depth: None,
            offset: 0,
            limit: None,
            is_child_query: false,
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn as_child_query(mut self) -> Self {
        self.is_child_query = true;
        self
    }
}

/// Something that can be evaluated in-memory against a live object. Both
/// `Criteria` and `QueryPredicate` implement it; `QueryPredicate::evaluate`
/// delegates to its criteria so the two compose uniformly (§4.1).
pub trait Predicate {
    fn evaluate(&self, mapping: &dyn ObjectMapping, object: &dyn Any) -> bool;
}

impl Predicate for QueryPredicate {
    fn evaluate(&self, mapping: &dyn ObjectMapping, object: &dyn Any) -> bool {
        self.criteria.evaluate(mapping, object)
    }
}

impl Predicate for Criteria {
    fn evaluate(&self, mapping: &dyn ObjectMapping, object: &dyn Any) -> bool {
        match self {
            Criteria::AlwaysTrue => true,
            // Sort keys are TRUE in-memory; they affect only SQL ORDER BY
            // (Invariant 7).
            Criteria::SortKey { .. } => true,
            Criteria::Comparison(op, rhs) => {
                // A bare comparison with no enclosing Element has no column
                // to read; this shape only ever appears nested under
                // Element in practice, so a bare evaluate is vacuously true.
                let _ = (op, rhs);
                true
            }
            Criteria::Element { target, inner } => {
                if let Some(attr) = resolve_attribute(mapping, target) {
                    if let Ok(value) = mapping.get_value(object, &attr) {
                        return evaluate_comparison(inner, &value);
                    }
                }
                false
            }
            Criteria::Function { inner, .. } => inner.evaluate(mapping, object),
            Criteria::Join { op, left, right } => {
                let l = left.evaluate(mapping, object);
                let r = right.evaluate(mapping, object);
                match op {
                    JoinOp::And => l && r,
                    JoinOp::Or => l || r,
                }
            }
            Criteria::Not(inner) => !inner.evaluate(mapping, object),
            // Sub-queries require a storage round-trip; callers that need
            // in-memory evaluation of a sub-query predicate must resolve it
            // externally. Treat as satisfied so composition doesn't panic.
            Criteria::SubQuery { .. } => true,
        }
    }
}

fn resolve_attribute(
    mapping: &dyn ObjectMapping,
    target: &ElementTarget,
) -> Option<AttributeDescriptor> {
    match target {
        ElementTarget::Field(name) => mapping
            .attributes()
            .iter()
            .find(|a| a.field_name == *name)
            .cloned(),
        ElementTarget::Attribute(attr) => Some(attr.clone()),
        ElementTarget::Function(_, inner) => resolve_attribute(mapping, inner),
    }
}

fn evaluate_comparison(inner: &Criteria, value: &Value) -> bool {
    match inner {
        Criteria::AlwaysTrue => true,
        Criteria::Comparison(op, rhs) => compare(*op, value, rhs),
        Criteria::Not(boxed) => !evaluate_comparison(boxed, value),
        Criteria::Join { op, left, right } => {
            let l = evaluate_comparison(left, value);
            let r = evaluate_comparison(right, value);
            match op {
                JoinOp::And => l && r,
                JoinOp::Or => l || r,
            }
        }
        _ => true,
    }
}

fn compare(op: ComparisonOp, value: &Value, rhs: &Value) -> bool {
    match op {
        ComparisonOp::Eq => values_eq(value, rhs),
        ComparisonOp::Ne => !values_eq(value, rhs),
        ComparisonOp::Lt => values_cmp(value, rhs) == Some(std::cmp::Ordering::Less),
        ComparisonOp::Le => matches!(
            values_cmp(value, rhs),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        ComparisonOp::Gt => values_cmp(value, rhs) == Some(std::cmp::Ordering::Greater),
        ComparisonOp::Ge => matches!(
            values_cmp(value, rhs),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        ComparisonOp::In => match rhs {
            Value::Collection(items) => items.iter().any(|item| values_eq(value, item)),
            other => values_eq(value, other),
        },
        ComparisonOp::Like => match (value.as_str(), rhs.as_str()) {
            (Some(v), Some(pattern)) => like_match(pattern, v),
            _ => false,
        },
        // Fuzzy matching has no in-memory equivalent; treat as an exact
        // match fallback, matching "used only when evaluated outside SQL"
        // (§4.1) which never really exercises similar_to in-memory.
        ComparisonOp::SimilarTo => values_eq(value, rhs),
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    a == b
}

fn values_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    use Value::*;
    match (a, b) {
        (Int8(x), Int8(y)) => x.partial_cmp(y),
        (Int16(x), Int16(y)) => x.partial_cmp(y),
        (Int32(x), Int32(y)) => x.partial_cmp(y),
        (Int64(x), Int64(y)) => x.partial_cmp(y),
        (Float32(x), Float32(y)) => x.partial_cmp(y),
        (Float64(x), Float64(y)) => x.partial_cmp(y),
        (String(x), String(y)) => x.partial_cmp(y),
        (Timestamp(x), Timestamp(y)) => x.partial_cmp(y),
        (Date(x), Date(y)) => x.partial_cmp(y),
        _ => a.as_i64().zip(b.as_i64()).and_then(|(x, y)| x.partial_cmp(&y)),
    }
}

/// In-memory `LIKE` semantics named in §4.1: `%` → any run of characters,
/// `_` → any single character, matched against the whole string.
fn like_match(pattern: &str, text: &str) -> bool {
    fn matches(pat: &[char], text: &[char]) -> bool {
        match pat.first() {
            None => text.is_empty(),
            Some('%') => {
                matches(&pat[1..], text)
                    || (!text.is_empty() && matches(pat, &text[1..]))
            }
            Some('_') => !text.is_empty() && matches(&pat[1..], &text[1..]),
            Some(c) => text.first() == Some(c) && matches(&pat[1..], &text[1..]),
        }
    }
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pat, &text)
}
