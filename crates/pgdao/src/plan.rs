//! Query plans and SQL compilation.
//!
//! A [`QueryPlan`] is the accumulated clause set behind a builder. It is a
//! plain value; compiling it to SQL allocates placeholder numbers in textual
//! order (FROM sub-queries, join conditions, WHERE, HAVING) so nested plans
//! can share one [`ParamList`].

use crate::cond::Cond;
use crate::error::{DaoError, DaoResult};
use crate::field::{Assign, AssignTarget, AssignValue, OrderExpr};
use crate::param::{Param, ParamList};
use crate::relation::Relation;

/// A compiled statement: SQL text plus its bind parameters.
#[derive(Clone, Debug)]
pub struct Query {
    pub sql: String,
    pub params: ParamList,
}

/// How a WHERE entry combines with what came before it.
#[derive(Clone, Debug)]
pub(crate) enum WherePart {
    And(Cond),
    Or(Cond),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct JoinClause {
    pub(crate) kind: JoinKind,
    pub(crate) table: String,
    pub(crate) alias: Option<String>,
    pub(crate) on: Vec<Cond>,
}

/// A plan wrapped for use as a derived table or scalar sub-query.
#[derive(Clone, Debug)]
pub struct SubQuery {
    plan: QueryPlan,
}

impl SubQuery {
    pub fn from_plan(plan: QueryPlan) -> Self {
        Self { plan }
    }

    pub(crate) fn into_plan(self) -> QueryPlan {
        self.plan
    }

    pub(crate) fn plan(&self) -> &QueryPlan {
        &self.plan
    }
}

/// The clause set of a single statement.
#[derive(Clone, Debug, Default)]
pub struct QueryPlan {
    pub(crate) table: String,
    pub(crate) alias: Option<String>,
    pub(crate) from_subs: Vec<SubQuery>,
    pub(crate) selects: Vec<String>,
    /// Columns appended to the projection without replacing it, e.g. a
    /// joined relation's picks riding alongside the model columns.
    pub(crate) extra_selects: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) omits: Vec<String>,
    pub(crate) wheres: Vec<WherePart>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Cond>,
    pub(crate) orders: Vec<OrderExpr>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    pub(crate) preloads: Vec<Relation>,
    pub(crate) attrs: Vec<Assign>,
    pub(crate) assigns: Vec<Assign>,
    pub(crate) returning: Vec<String>,
    pub(crate) unscoped: bool,
}

impl QueryPlan {
    pub(crate) fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// The table name queries run against: the alias when one is set.
    pub(crate) fn effective_table(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub(crate) fn push_and(&mut self, cond: Cond) {
        if !cond.is_inert() {
            self.wheres.push(WherePart::And(cond));
        }
    }

    pub(crate) fn push_or(&mut self, cond: Cond) {
        if !cond.is_inert() {
            self.wheres.push(WherePart::Or(cond));
        }
    }

    /// First deferred error in any stored condition.
    pub(crate) fn clause_error(&self) -> Option<&str> {
        let in_wheres = self.wheres.iter().find_map(|p| match p {
            WherePart::And(c) | WherePart::Or(c) => c.error(),
        });
        in_wheres
            .or_else(|| {
                self.joins
                    .iter()
                    .find_map(|j| j.on.iter().find_map(|c| c.error()))
            })
            .or_else(|| self.havings.iter().find_map(|c| c.error()))
            .or_else(|| self.from_subs.iter().find_map(|s| s.plan().clause_error()))
    }

    fn from_clause(&self, params: &mut ParamList) -> String {
        if !self.from_subs.is_empty() {
            let parts: Vec<String> = self
                .from_subs
                .iter()
                .enumerate()
                .map(|(i, sub)| {
                    // The captured alias names the derived table; it must not
                    // leak into the sub-select's own FROM clause.
                    let mut inner_plan = sub.plan().clone();
                    let alias = match inner_plan.alias.take() {
                        Some(a) => a,
                        None => format!("sub_{}", i + 1),
                    };
                    let inner = inner_plan.render_select(params, None);
                    format!("({inner}) AS {alias}")
                })
                .collect();
            return parts.join(", ");
        }
        match &self.alias {
            Some(a) => format!("{} AS {}", self.table, a),
            None => self.table.clone(),
        }
    }

    fn join_clause(&self, params: &mut ParamList) -> String {
        let mut out = String::new();
        for join in &self.joins {
            let target = match &join.alias {
                Some(a) => format!("{} AS {}", join.table, a),
                None => join.table.clone(),
            };
            let on = Cond::and(join.on.clone()).render(params);
            out.push_str(&format!(" {} {} ON {}", join.kind.keyword(), target, on));
        }
        out
    }

    /// Render the accumulated WHERE parts, or `None` when there are none.
    pub(crate) fn where_fragment(&self, params: &mut ParamList) -> Option<String> {
        Self::render_where_parts(&self.wheres, params)
    }

    /// WHERE parts for an aliased write statement. Postgres forbids the
    /// original table name once `UPDATE ... AS alias` is in effect, so every
    /// column reference is requalified to the alias first.
    fn write_where_fragment(&self, params: &mut ParamList) -> Option<String> {
        match &self.alias {
            Some(alias) => {
                let requalified: Vec<WherePart> = self
                    .wheres
                    .iter()
                    .cloned()
                    .map(|part| match part {
                        WherePart::And(mut c) => {
                            c.requalify(alias);
                            WherePart::And(c)
                        }
                        WherePart::Or(mut c) => {
                            c.requalify(alias);
                            WherePart::Or(c)
                        }
                    })
                    .collect();
                Self::render_where_parts(&requalified, params)
            }
            None => self.where_fragment(params),
        }
    }

    fn render_where_parts(parts: &[WherePart], params: &mut ParamList) -> Option<String> {
        let mut out = String::new();
        for part in parts {
            let (connector, cond) = match part {
                WherePart::And(c) => (" AND ", c),
                WherePart::Or(c) => (" OR ", c),
            };
            let mut frag = cond.render(params);
            if matches!(cond, Cond::And(_) | Cond::Or(_)) && !out.is_empty() {
                frag = format!("({frag})");
            }
            if out.is_empty() {
                out = frag;
            } else {
                out.push_str(connector);
                out.push_str(&frag);
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }

    fn select_list(&self, model_cols: Option<&[&str]>) -> String {
        let base = if !self.selects.is_empty() {
            self.selects.join(", ")
        } else {
            match model_cols {
                Some(cols) => {
                    let table = self.effective_table().to_string();
                    let kept: Vec<String> = cols
                        .iter()
                        .filter(|c| !self.omits.iter().any(|o| o == *c))
                        .map(|c| {
                            if self.joins.is_empty() && self.from_subs.is_empty() {
                                (*c).to_string()
                            } else {
                                format!("{table}.{c}")
                            }
                        })
                        .collect();
                    if kept.is_empty() {
                        "*".to_string()
                    } else {
                        kept.join(", ")
                    }
                }
                None => "*".to_string(),
            }
        };
        if self.extra_selects.is_empty() {
            base
        } else {
            format!("{base}, {}", self.extra_selects.join(", "))
        }
    }

    /// Render the full SELECT statement against a shared parameter list.
    pub(crate) fn render_select(&self, params: &mut ParamList, model_cols: Option<&[&str]>) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.select_list(model_cols));
        sql.push_str(" FROM ");
        sql.push_str(&self.from_clause(params));
        sql.push_str(&self.join_clause(params));
        if let Some(wh) = self.where_fragment(params) {
            sql.push_str(" WHERE ");
            sql.push_str(&wh);
        }
        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.groups.join(", "));
        }
        if !self.havings.is_empty() {
            let having = Cond::and(self.havings.clone()).render(params);
            sql.push_str(" HAVING ");
            sql.push_str(&having);
        }
        if !self.orders.is_empty() {
            let orders: Vec<String> = self.orders.iter().map(|o| o.to_sql()).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    pub(crate) fn select_query(&self, model_cols: Option<&[&str]>) -> Query {
        let mut params = ParamList::new();
        let sql = self.render_select(&mut params, model_cols);
        Query { sql, params }
    }

    /// Compile `SELECT COUNT(*)`. Plans with DISTINCT, grouping, or paging
    /// are wrapped as a derived table so the count reflects the result set.
    pub(crate) fn count_query(&self) -> Query {
        let mut params = ParamList::new();
        let needs_wrap = self.distinct
            || !self.groups.is_empty()
            || !self.havings.is_empty()
            || self.limit.is_some()
            || self.offset.is_some();
        let sql = if needs_wrap {
            let inner = self.render_select(&mut params, None);
            format!("SELECT COUNT(*) FROM ({inner}) AS count_subquery")
        } else {
            let mut sql = String::from("SELECT COUNT(*) FROM ");
            sql.push_str(&self.from_clause(&mut params));
            sql.push_str(&self.join_clause(&mut params));
            if let Some(wh) = self.where_fragment(&mut params) {
                sql.push_str(" WHERE ");
                sql.push_str(&wh);
            }
            sql
        };
        Query { sql, params }
    }

    fn set_clause(assigns: &[Assign], params: &mut ParamList) -> Option<String> {
        let parts: Vec<String> = assigns
            .iter()
            .filter(|a| !a.is_empty())
            .map(|assign| {
                let target = match &assign.target {
                    AssignTarget::Column(c) => c.name().to_string(),
                    AssignTarget::Tuple(cols) => {
                        let names: Vec<&str> = cols.iter().map(|c| c.name()).collect();
                        format!("({})", names.join(", "))
                    }
                };
                match &assign.value {
                    AssignValue::Value(p) => {
                        let idx = params.push_param(p.clone());
                        format!("{target} = ${idx}")
                    }
                    AssignValue::Expr(expr) => format!("{target} = {expr}"),
                    AssignValue::Query(plan) => {
                        let sub = plan.render_select(params, None);
                        format!("{target} = ({sub})")
                    }
                }
            })
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(", ")) }
    }

    /// Compile an UPDATE. Returns `None` when every assignment is empty.
    ///
    /// A statement with no WHERE clause is compiled with a false guard unless
    /// the plan is unscoped, so a bare chain cannot rewrite a whole table.
    pub(crate) fn update_query(&self, assigns: &[Assign]) -> Option<Query> {
        let mut params = ParamList::new();
        let mut sql = format!("UPDATE {}", self.table);
        if let Some(a) = &self.alias {
            sql.push_str(&format!(" AS {a}"));
        }
        let set = Self::set_clause(assigns, &mut params)?;
        sql.push_str(" SET ");
        sql.push_str(&set);
        match self.write_where_fragment(&mut params) {
            Some(wh) => {
                sql.push_str(" WHERE ");
                sql.push_str(&wh);
            }
            None if !self.unscoped => sql.push_str(" WHERE 1=0"),
            None => {}
        }
        sql.push_str(&self.returning_clause());
        Some(Query { sql, params })
    }

    /// Compile a DELETE, with the same no-WHERE guard as UPDATE.
    pub(crate) fn delete_query(&self) -> Query {
        let mut params = ParamList::new();
        let mut sql = format!("DELETE FROM {}", self.table);
        if let Some(a) = &self.alias {
            sql.push_str(&format!(" AS {a}"));
        }
        match self.write_where_fragment(&mut params) {
            Some(wh) => {
                sql.push_str(" WHERE ");
                sql.push_str(&wh);
            }
            None if !self.unscoped => sql.push_str(" WHERE 1=0"),
            None => {}
        }
        sql.push_str(&self.returning_clause());
        Query { sql, params }
    }

    /// Compile a multi-row INSERT. `upsert_key` adds an ON CONFLICT clause
    /// that overwrites every non-key column with the excluded value.
    pub(crate) fn insert_query(
        &self,
        columns: &[&str],
        rows: Vec<Vec<Param>>,
        upsert_key: Option<&str>,
    ) -> DaoResult<Query> {
        if columns.is_empty() || rows.is_empty() {
            return Err(DaoError::invalid("insert requires at least one column and one row"));
        }
        let mut params = ParamList::new();
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(DaoError::invalid("insert row width does not match column count"));
            }
            let cells: Vec<String> = row
                .into_iter()
                .map(|p| format!("${}", params.push_param(p)))
                .collect();
            groups.push(format!("({})", cells.join(", ")));
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            columns.join(", "),
            groups.join(", "),
        );
        if let Some(key) = upsert_key {
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| **c != key)
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({key}) DO NOTHING"));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({key}) DO UPDATE SET {}",
                    updates.join(", ")
                ));
            }
        }
        sql.push_str(&self.returning_clause());
        Ok(Query { sql, params })
    }

    fn returning_clause(&self) -> String {
        if self.returning.is_empty() {
            String::new()
        } else {
            format!(" RETURNING {}", self.returning.join(", "))
        }
    }
}
