//! Relation descriptors and the clause rewriter.
//!
//! A [`Relation`] describes how a child table hangs off a parent: the linkage
//! keys plus any extra conditions, column picks, ordering, and paging the
//! association carries. The same descriptor serves two paths: merged into the
//! parent plan as a JOIN, or kept aside and loaded as a second `ANY($1)`
//! query keyed by the parent ids.

use crate::client::GenericClient;
use crate::cond::Cond;
use crate::error::DaoResult;
use crate::field::{ColumnRef, OrderExpr};
use crate::param::Param;
use crate::plan::{JoinClause, JoinKind, Query, QueryPlan};
use crate::row::{FromRow, RowExt};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio_postgres::types::{FromSql, ToSql};

/// A reusable plan transformation attached to a relation.
#[derive(Clone)]
pub struct Scope(Arc<dyn Fn(QueryPlan) -> QueryPlan + Send + Sync>);

impl Scope {
    pub fn new(f: impl Fn(QueryPlan) -> QueryPlan + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn apply(&self, plan: QueryPlan) -> QueryPlan {
        (self.0)(plan)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Scope").field(&"<fn>").finish()
    }
}

/// An association between a parent model and a related table.
#[derive(Clone, Debug)]
pub struct Relation {
    pub(crate) path: String,
    pub(crate) table: String,
    pub(crate) foreign_key: ColumnRef,
    pub(crate) owner_key: ColumnRef,
    pub(crate) kind: JoinKind,
    pub(crate) conds: Vec<Cond>,
    pub(crate) selects: Vec<String>,
    pub(crate) orders: Vec<OrderExpr>,
    pub(crate) page: Option<(i64, i64)>,
    pub(crate) scopes: Vec<Scope>,
}

impl Relation {
    /// Describe an association. `foreign_key` names the column on the related
    /// table; `owner_key` is the parent column it references.
    pub fn new(
        path: impl Into<String>,
        table: impl Into<String>,
        foreign_key: &str,
        owner_key: ColumnRef,
    ) -> Self {
        let table = table.into();
        Self {
            path: path.into(),
            foreign_key: ColumnRef::new(&table, foreign_key),
            owner_key,
            table,
            kind: JoinKind::Left,
            conds: Vec::new(),
            selects: Vec::new(),
            orders: Vec::new(),
            page: None,
            scopes: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Extra conditions the association always carries. An empty list is
    /// fine; the key linkage alone drives the join.
    pub fn on(mut self, conds: Vec<Cond>) -> Self {
        self.conds.extend(conds);
        self
    }

    pub fn kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn select(mut self, columns: Vec<&str>) -> Self {
        self.selects
            .extend(columns.into_iter().map(|c| c.to_string()));
        self
    }

    pub fn order(mut self, orders: Vec<OrderExpr>) -> Self {
        self.orders.extend(orders);
        self
    }

    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.page = Some((offset, limit));
        self
    }

    pub fn scope(mut self, f: impl Fn(QueryPlan) -> QueryPlan + Send + Sync + 'static) -> Self {
        self.scopes.push(Scope::new(f));
        self
    }

    /// Merge this relation into `plan` as a JOIN.
    ///
    /// Stored conditions and orders are requalified to the related table so a
    /// descriptor authored against bare column names lands on the right side
    /// of the join. Relation paging only applies when the plan has none of
    /// its own. Scopes run against the whole plan, after the join is added.
    pub(crate) fn merge_join(&self, mut plan: QueryPlan) -> QueryPlan {
        let linkage = Cond::CompareCol {
            left: self.foreign_key.with_table(&self.table),
            op: "=",
            right: self.owner_key.clone(),
        };
        let mut on = vec![linkage];
        for cond in &self.conds {
            let mut c = cond.clone();
            c.requalify(&self.table);
            on.push(c);
        }
        plan.joins.push(JoinClause {
            kind: self.kind,
            table: self.table.clone(),
            alias: None,
            on,
        });
        for sel in &self.selects {
            plan.extra_selects.push(format!("{}.{}", self.table, sel));
        }
        for order in &self.orders {
            let mut o = order.clone();
            o.requalify(&self.table);
            plan.orders.push(o);
        }
        if let Some((offset, limit)) = self.page {
            if plan.limit.is_none() {
                plan.limit = Some(limit);
            }
            if plan.offset.is_none() {
                plan.offset = Some(offset);
            }
        }
        for scope in &self.scopes {
            plan = scope.apply(plan);
        }
        plan
    }

    /// Compile the second query that loads related rows for a parent batch.
    pub(crate) fn batch_query(&self, parent_ids: Param) -> Query {
        let mut plan = QueryPlan::for_table(&self.table);
        plan.push_and(Cond::AnyOf {
            column: self.foreign_key.clone(),
            list: parent_ids,
        });
        for cond in &self.conds {
            let mut c = cond.clone();
            c.requalify(&self.table);
            plan.push_and(c);
        }
        plan.selects = self.selects.clone();
        // Grouping by foreign key needs that column in the projection.
        if !plan.selects.is_empty() {
            let fk = self.foreign_key.name();
            let has_fk = plan
                .selects
                .iter()
                .any(|s| s == fk || s.ends_with(&format!(".{fk}")));
            if !has_fk {
                plan.selects.push(self.foreign_key.to_sql());
            }
        }
        for order in &self.orders {
            let mut o = order.clone();
            o.requalify(&self.table);
            plan.orders.push(o);
        }
        if let Some((offset, limit)) = self.page {
            plan.offset = Some(offset);
            plan.limit = Some(limit);
        }
        for scope in &self.scopes {
            plan = scope.apply(plan);
        }
        plan.select_query(None)
    }
}

/// Load the related rows for a batch of parents and group them by foreign
/// key value. Duplicate parent ids are collapsed; an empty batch never hits
/// the database.
pub async fn load_related<C, Id>(
    conn: &impl GenericClient,
    relation: &Relation,
    parent_ids: &[Id],
) -> DaoResult<HashMap<Id, Vec<C>>>
where
    C: FromRow,
    Id: ToSql + for<'a> FromSql<'a> + Eq + Hash + Clone + Send + Sync + 'static,
{
    let mut ids: Vec<Id> = Vec::with_capacity(parent_ids.len());
    for id in parent_ids {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let query = relation.batch_query(Param::new(ids));
    let rows = conn.query(&query.sql, &query.params.as_refs()).await?;
    let mut grouped: HashMap<Id, Vec<C>> = HashMap::new();
    for row in &rows {
        let key: Id = row.try_get_column(relation.foreign_key.name())?;
        grouped.entry(key).or_default().push(C::from_row(row)?);
    }
    Ok(grouped)
}
