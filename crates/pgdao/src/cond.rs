//! Condition algebra.
//!
//! A [`Cond`] is an immutable description of a WHERE/ON predicate. Rendering
//! happens once, at build time, against a shared [`ParamList`] so placeholder
//! numbering stays correct no matter how deeply conditions nest.

use crate::field::ColumnRef;
use crate::param::{Param, ParamList};
use crate::plan::{QueryPlan, SubQuery};

/// A closed predicate tree.
///
/// Construction errors (bad identifiers, malformed operator input) become the
/// `Invalid` variant instead of a `Result`, so combinators stay infallible;
/// the error surfaces when a builder that carries the condition is executed.
#[derive(Clone, Debug)]
pub enum Cond {
    /// The inert empty condition. Dropped from AND/OR groups; conjoining or
    /// disjoining with it is an identity operation.
    None,
    True,
    False,
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Not(Box<Cond>),
    Compare {
        column: ColumnRef,
        op: &'static str,
        value: Param,
    },
    /// Column-to-column comparison, for join linkage.
    CompareCol {
        left: ColumnRef,
        op: &'static str,
        right: ColumnRef,
    },
    /// Comparison against a scalar sub-query.
    CompareSub {
        column: ColumnRef,
        op: &'static str,
        plan: Box<QueryPlan>,
    },
    NullCheck {
        column: ColumnRef,
        is_null: bool,
    },
    InList {
        columns: Vec<ColumnRef>,
        values: Vec<Param>,
        negated: bool,
    },
    InSub {
        columns: Vec<ColumnRef>,
        plan: Box<QueryPlan>,
        negated: bool,
    },
    Between {
        column: ColumnRef,
        from: Param,
        to: Param,
        negated: bool,
    },
    /// `col = ANY($n)` against an array parameter. Used by relation loading.
    AnyOf {
        column: ColumnRef,
        list: Param,
    },
    /// The WHERE fragment of another builder, embedded as a group.
    Where(Box<QueryPlan>),
    Raw(String),
    /// A deferred construction error.
    Invalid(String),
}

impl Cond {
    /// Conjunction. Empty and single-element inputs collapse.
    pub fn and(mut conds: Vec<Cond>) -> Cond {
        conds.retain(|c| !c.is_inert());
        match conds.len() {
            0 => Cond::None,
            1 => conds.pop().unwrap_or(Cond::None),
            _ => Cond::And(conds),
        }
    }

    /// Disjunction. Empty and single-element inputs collapse.
    pub fn or(mut conds: Vec<Cond>) -> Cond {
        conds.retain(|c| !c.is_inert());
        match conds.len() {
            0 => Cond::None,
            1 => conds.pop().unwrap_or(Cond::None),
            _ => Cond::Or(conds),
        }
    }

    /// Negation of the conjunction of `conds`.
    pub fn not(conds: Vec<Cond>) -> Cond {
        match Cond::and(conds) {
            Cond::None => Cond::None,
            c => Cond::Not(Box::new(c)),
        }
    }

    pub(crate) fn compare_sub(column: ColumnRef, op: &'static str, sub: SubQuery) -> Cond {
        Cond::CompareSub {
            column,
            op,
            plan: Box::new(sub.into_plan()),
        }
    }

    pub(crate) fn in_sub(columns: Vec<ColumnRef>, sub: SubQuery, negated: bool) -> Cond {
        Cond::InSub {
            columns,
            plan: Box::new(sub.into_plan()),
            negated,
        }
    }

    pub(crate) fn in_values(columns: Vec<ColumnRef>, values: Vec<Param>, negated: bool) -> Cond {
        // A multi-column target consumes values in row tuples; a count that
        // does not tile evenly cannot render a valid value list.
        if columns.len() > 1 && values.len() % columns.len() != 0 {
            return Cond::Invalid(format!(
                "IN list of {} values does not fill rows of {} columns",
                values.len(),
                columns.len()
            ));
        }
        Cond::InList {
            columns,
            values,
            negated,
        }
    }

    /// True for conditions that contribute nothing when combined.
    pub fn is_inert(&self) -> bool {
        matches!(self, Cond::None)
    }

    /// First deferred construction error in the tree, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Cond::Invalid(msg) => Some(msg),
            Cond::And(cs) | Cond::Or(cs) => cs.iter().find_map(|c| c.error()),
            Cond::Not(c) => c.error(),
            Cond::CompareSub { plan, .. } | Cond::InSub { plan, .. } | Cond::Where(plan) => {
                plan.clause_error()
            }
            _ => None,
        }
    }

    /// Rewrite embedded column qualifiers to `table`.
    ///
    /// Used when a relation's stored conditions are merged into a join: the
    /// descriptor's columns are authored against the related table and must
    /// follow its alias. Sub-plans are left untouched, and the right side of
    /// a column-to-column comparison keeps its qualifier since it points at
    /// the other table.
    pub(crate) fn requalify(&mut self, table: &str) {
        match self {
            Cond::And(cs) | Cond::Or(cs) => {
                for c in cs {
                    c.requalify(table);
                }
            }
            Cond::Not(c) => c.requalify(table),
            Cond::Compare { column, .. }
            | Cond::CompareSub { column, .. }
            | Cond::NullCheck { column, .. }
            | Cond::Between { column, .. }
            | Cond::AnyOf { column, .. } => *column = column.with_table(table),
            Cond::CompareCol { left, .. } => *left = left.with_table(table),
            Cond::InList { columns, .. } | Cond::InSub { columns, .. } => {
                for col in columns {
                    *col = col.with_table(table);
                }
            }
            _ => {}
        }
    }

    /// Render to a SQL fragment, appending bind values to `params`.
    pub(crate) fn render(&self, params: &mut ParamList) -> String {
        match self {
            Cond::None | Cond::True => "1=1".to_string(),
            Cond::False => "1=0".to_string(),
            Cond::And(cs) => Self::render_group(cs, " AND ", params),
            Cond::Or(cs) => Self::render_group(cs, " OR ", params),
            Cond::Not(c) => format!("NOT ({})", c.render(params)),
            Cond::Compare { column, op, value } => {
                let idx = params.push_param(value.clone());
                format!("{} {} ${}", column.to_sql(), op, idx)
            }
            Cond::CompareCol { left, op, right } => {
                format!("{} {} {}", left.to_sql(), op, right.to_sql())
            }
            Cond::CompareSub { column, op, plan } => {
                let sub = plan.render_select(params, None);
                format!("{} {} ({})", column.to_sql(), op, sub)
            }
            Cond::NullCheck { column, is_null } => {
                if *is_null {
                    format!("{} IS NULL", column.to_sql())
                } else {
                    format!("{} IS NOT NULL", column.to_sql())
                }
            }
            Cond::InList {
                columns,
                values,
                negated,
            } => Self::render_in_list(columns, values, *negated, params),
            Cond::InSub {
                columns,
                plan,
                negated,
            } => {
                let target = Self::render_column_tuple(columns);
                let sub = plan.render_select(params, None);
                if *negated {
                    format!("{target} NOT IN ({sub})")
                } else {
                    format!("{target} IN ({sub})")
                }
            }
            Cond::Between {
                column,
                from,
                to,
                negated,
            } => {
                let lo = params.push_param(from.clone());
                let hi = params.push_param(to.clone());
                if *negated {
                    format!("{} NOT BETWEEN ${} AND ${}", column.to_sql(), lo, hi)
                } else {
                    format!("{} BETWEEN ${} AND ${}", column.to_sql(), lo, hi)
                }
            }
            Cond::AnyOf { column, list } => {
                let idx = params.push_param(list.clone());
                format!("{} = ANY(${})", column.to_sql(), idx)
            }
            Cond::Where(plan) => match plan.where_fragment(params) {
                Some(fragment) => format!("({fragment})"),
                None => "1=1".to_string(),
            },
            Cond::Raw(sql) => sql.clone(),
            // Executing a builder that carries an error never reaches render;
            // a standalone render of the variant degrades to a false guard.
            Cond::Invalid(_) => "1=0".to_string(),
        }
    }

    fn render_group(conds: &[Cond], sep: &str, params: &mut ParamList) -> String {
        let rendered: Vec<String> = conds
            .iter()
            .filter(|c| !c.is_inert())
            .map(|c| {
                let frag = c.render(params);
                if c.needs_parens() {
                    format!("({frag})")
                } else {
                    frag
                }
            })
            .collect();
        if rendered.is_empty() {
            "1=1".to_string()
        } else {
            rendered.join(sep)
        }
    }

    fn needs_parens(&self) -> bool {
        matches!(self, Cond::And(_) | Cond::Or(_))
    }

    fn render_column_tuple(columns: &[ColumnRef]) -> String {
        if columns.len() == 1 {
            columns[0].to_sql()
        } else {
            let names: Vec<String> = columns.iter().map(|c| c.to_sql()).collect();
            format!("({})", names.join(", "))
        }
    }

    fn render_in_list(
        columns: &[ColumnRef],
        values: &[Param],
        negated: bool,
        params: &mut ParamList,
    ) -> String {
        if values.is_empty() || columns.is_empty() {
            // Empty IN matches nothing; empty NOT IN excludes nothing.
            return if negated { "1=1" } else { "1=0" }.to_string();
        }
        let target = Self::render_column_tuple(columns);
        let width = columns.len();
        let placeholders: Vec<String> = if width == 1 {
            values
                .iter()
                .map(|v| format!("${}", params.push_param(v.clone())))
                .collect()
        } else {
            values
                .chunks(width)
                .map(|row| {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|v| format!("${}", params.push_param(v.clone())))
                        .collect();
                    format!("({})", cells.join(", "))
                })
                .collect()
        };
        if negated {
            format!("{} NOT IN ({})", target, placeholders.join(", "))
        } else {
            format!("{} IN ({})", target, placeholders.join(", "))
        }
    }
}
