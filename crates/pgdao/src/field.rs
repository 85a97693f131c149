//! Typed column handles and assignment expressions.
//!
//! Generated per-table accessor code owns one [`Field`] per column; builders
//! only ever borrow them. Composing fields into conditions or assignments
//! never mutates the field.

use crate::cond::Cond;
use crate::error::DaoResult;
use crate::ident;
use crate::param::Param;
use crate::plan::SubQuery;
use std::marker::PhantomData;
use tokio_postgres::types::ToSql;

/// A table-qualified column reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRef {
    pub(crate) table: Option<String>,
    pub(crate) name: String,
}

impl ColumnRef {
    /// Create a column reference. Intended for generated code; names are not
    /// re-validated here.
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Create an unqualified column reference.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// Parse and validate a `table.column` or `column` string.
    pub fn parse(s: &str) -> DaoResult<Self> {
        ident::validate(s)?;
        match s.rsplit_once('.') {
            Some((table, name)) => Ok(Self::new(table, name)),
            None => Ok(Self::bare(s)),
        }
    }

    /// Return a copy qualified by `table`, replacing any prior qualifier.
    pub fn with_table(&self, table: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            name: self.name.clone(),
        }
    }

    /// Column name without qualifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render as SQL (`table.name` or `name`).
    pub fn to_sql(&self) -> String {
        match &self.table {
            Some(t) => format!("{}.{}", t, self.name),
            None => self.name.clone(),
        }
    }
}

/// A typed column handle bound to a table.
///
/// The type parameter is the column's value kind; comparison methods only
/// accept values of that kind.
pub struct Field<T> {
    col: ColumnRef,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            col: self.col.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Field").field(&self.col.to_sql()).finish()
    }
}

impl<T> Field<T> {
    /// Create a field handle for `table.name`.
    pub fn new(table: &str, name: &str) -> Self {
        Self {
            col: ColumnRef::new(table, name),
            _ty: PhantomData,
        }
    }

    /// The underlying column reference.
    pub fn col(&self) -> &ColumnRef {
        &self.col
    }

    /// Ascending order expression.
    pub fn asc(&self) -> OrderExpr {
        OrderExpr {
            col: self.col.clone(),
            desc: false,
        }
    }

    /// Descending order expression.
    pub fn desc(&self) -> OrderExpr {
        OrderExpr {
            col: self.col.clone(),
            desc: true,
        }
    }

    pub fn is_null(&self) -> Cond {
        Cond::NullCheck {
            column: self.col.clone(),
            is_null: true,
        }
    }

    pub fn is_not_null(&self) -> Cond {
        Cond::NullCheck {
            column: self.col.clone(),
            is_null: false,
        }
    }

    /// Column-to-column comparison (used in join ON conditions).
    pub fn eq_col<U>(&self, other: &Field<U>) -> Cond {
        Cond::CompareCol {
            left: self.col.clone(),
            op: "=",
            right: other.col.clone(),
        }
    }

    /// Compare against a sub-query: `col = (SELECT ...)`.
    pub fn eq_query(&self, sub: SubQuery) -> Cond {
        Cond::compare_sub(self.col.clone(), "=", sub)
    }

    /// Membership test against a sub-query: `col IN (SELECT ...)`.
    pub fn in_query(&self, sub: SubQuery) -> Cond {
        Cond::in_sub(vec![self.col.clone()], sub, false)
    }

    /// Negated membership test against a sub-query.
    pub fn not_in_query(&self, sub: SubQuery) -> Cond {
        Cond::in_sub(vec![self.col.clone()], sub, true)
    }

    /// Assign a raw SQL expression to this column (`SET col = <expr>`).
    pub fn set_expr(&self, expr: impl Into<String>) -> Assign {
        Assign {
            target: AssignTarget::Column(self.col.clone()),
            value: AssignValue::Expr(expr.into()),
        }
    }

    /// Assign the scalar result of a sub-query to this column.
    pub fn set_query(&self, sub: SubQuery) -> Assign {
        Assign {
            target: AssignTarget::Column(self.col.clone()),
            value: AssignValue::Query(Box::new(sub.into_plan())),
        }
    }
}

impl<T: ToSql + Send + Sync + 'static> Field<T> {
    pub fn eq(&self, value: T) -> Cond {
        self.cmp("=", value)
    }

    pub fn ne(&self, value: T) -> Cond {
        self.cmp("!=", value)
    }

    pub fn gt(&self, value: T) -> Cond {
        self.cmp(">", value)
    }

    pub fn gte(&self, value: T) -> Cond {
        self.cmp(">=", value)
    }

    pub fn lt(&self, value: T) -> Cond {
        self.cmp("<", value)
    }

    pub fn lte(&self, value: T) -> Cond {
        self.cmp("<=", value)
    }

    pub fn in_list(&self, values: Vec<T>) -> Cond {
        Cond::in_values(vec![self.col.clone()], values.into_iter().map(Param::new).collect(), false)
    }

    pub fn not_in(&self, values: Vec<T>) -> Cond {
        Cond::in_values(vec![self.col.clone()], values.into_iter().map(Param::new).collect(), true)
    }

    pub fn between(&self, from: T, to: T) -> Cond {
        Cond::Between {
            column: self.col.clone(),
            from: Param::new(from),
            to: Param::new(to),
            negated: false,
        }
    }

    pub fn not_between(&self, from: T, to: T) -> Cond {
        Cond::Between {
            column: self.col.clone(),
            from: Param::new(from),
            to: Param::new(to),
            negated: true,
        }
    }

    /// Assignment expression for UPDATE/INSERT SET clauses.
    pub fn set(&self, value: T) -> Assign {
        Assign {
            target: AssignTarget::Column(self.col.clone()),
            value: AssignValue::Value(Param::new(value)),
        }
    }

    fn cmp(&self, op: &'static str, value: T) -> Cond {
        Cond::Compare {
            column: self.col.clone(),
            op,
            value: Param::new(value),
        }
    }
}

impl Field<String> {
    pub fn like(&self, pattern: impl Into<String>) -> Cond {
        Cond::Compare {
            column: self.col.clone(),
            op: "LIKE",
            value: Param::new(pattern.into()),
        }
    }

    pub fn ilike(&self, pattern: impl Into<String>) -> Cond {
        Cond::Compare {
            column: self.col.clone(),
            op: "ILIKE",
            value: Param::new(pattern.into()),
        }
    }
}

/// An ordering expression (`col` or `col DESC`).
#[derive(Clone, Debug)]
pub struct OrderExpr {
    pub(crate) col: ColumnRef,
    pub(crate) desc: bool,
}

impl OrderExpr {
    pub fn to_sql(&self) -> String {
        if self.desc {
            format!("{} DESC", self.col.to_sql())
        } else {
            self.col.to_sql()
        }
    }

    pub(crate) fn requalify(&mut self, table: &str) {
        self.col = self.col.with_table(table);
    }
}

/// The left-hand side of a SET assignment.
#[derive(Clone, Debug)]
pub(crate) enum AssignTarget {
    Column(ColumnRef),
    /// Multi-column tuple assignment: `(a, b) = (SELECT ...)`.
    Tuple(Vec<ColumnRef>),
}

/// The right-hand side of a SET assignment.
#[derive(Clone, Debug)]
pub(crate) enum AssignValue {
    Value(Param),
    Expr(String),
    Query(Box<crate::plan::QueryPlan>),
}

/// A column paired with a value, expression, or sub-query, destined for an
/// UPDATE/INSERT SET clause.
#[derive(Clone, Debug)]
pub struct Assign {
    pub(crate) target: AssignTarget,
    pub(crate) value: AssignValue,
}

impl Assign {
    /// Create an assignment from a bare column name and value.
    pub fn value<T: ToSql + Send + Sync + 'static>(column: &str, value: T) -> Self {
        Self {
            target: AssignTarget::Column(ColumnRef::bare(column)),
            value: AssignValue::Value(Param::new(value)),
        }
    }

    /// Column names written by this assignment.
    pub(crate) fn column_names(&self) -> Vec<&str> {
        match &self.target {
            AssignTarget::Column(c) => vec![c.name()],
            AssignTarget::Tuple(cols) => cols.iter().map(|c| c.name()).collect(),
        }
    }

    /// True when the assignment writes nothing (empty tuple target).
    pub(crate) fn is_empty(&self) -> bool {
        matches!(&self.target, AssignTarget::Tuple(cols) if cols.is_empty())
    }
}

/// A column group used for sub-query comparison and assignment.
///
/// An empty group degrades every operation to the inert empty condition; it
/// is never an error.
#[derive(Clone, Debug, Default)]
pub struct Columns(pub Vec<ColumnRef>);

impl Columns {
    pub fn new(cols: Vec<ColumnRef>) -> Self {
        Self(cols)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Assign the columns from a sub-query: `(a, b) = (SELECT ...)`.
    ///
    /// An empty group yields a no-op assignment.
    pub fn set(&self, sub: SubQuery) -> Assign {
        Assign {
            target: AssignTarget::Tuple(self.0.clone()),
            value: AssignValue::Query(Box::new(sub.into_plan())),
        }
    }

    /// Membership test against a sub-query.
    pub fn in_query(&self, sub: SubQuery) -> Cond {
        if self.0.is_empty() {
            return Cond::None;
        }
        Cond::in_sub(self.0.clone(), sub, false)
    }

    /// Negated membership test against a sub-query.
    pub fn not_in_query(&self, sub: SubQuery) -> Cond {
        if self.0.is_empty() {
            return Cond::None;
        }
        Cond::in_sub(self.0.clone(), sub, true)
    }

    /// Membership test against a literal value set.
    pub fn in_values<T: ToSql + Send + Sync + 'static>(&self, values: Vec<T>) -> Cond {
        if self.0.is_empty() {
            return Cond::None;
        }
        Cond::in_values(self.0.clone(), values.into_iter().map(Param::new).collect(), false)
    }

    pub fn eq(&self, sub: SubQuery) -> Cond {
        self.cmp_sub("=", sub)
    }

    pub fn ne(&self, sub: SubQuery) -> Cond {
        self.cmp_sub("!=", sub)
    }

    pub fn gt(&self, sub: SubQuery) -> Cond {
        self.cmp_sub(">", sub)
    }

    pub fn gte(&self, sub: SubQuery) -> Cond {
        self.cmp_sub(">=", sub)
    }

    pub fn lt(&self, sub: SubQuery) -> Cond {
        self.cmp_sub("<", sub)
    }

    pub fn lte(&self, sub: SubQuery) -> Cond {
        self.cmp_sub("<=", sub)
    }

    fn cmp_sub(&self, op: &'static str, sub: SubQuery) -> Cond {
        match self.0.first() {
            Some(col) => Cond::compare_sub(col.clone(), op, sub),
            None => Cond::None,
        }
    }
}
