//! The chainable data-access builder.
//!
//! A [`Dao`] is a copy-on-write value: every verb consumes `self` and
//! returns the extended chain, and `Clone` forks an independent chain, so a
//! shared base query can branch without interference. Construction problems
//! (empty join conditions, bad identifiers) do not panic and do not produce
//! `Result`s mid-chain; they ride along as a deferred error and fail the
//! next finisher.

use crate::client::GenericClient;
use crate::cond::Cond;
use crate::derive::{Filterable, TableResolver, derive_conditions};
use crate::error::{ChainError, DaoError, DaoResult};
use crate::field::{Assign, AssignValue, Field, OrderExpr};
use crate::ident;
use crate::model::{AssignSource, InsertRow, Model};
use crate::param::Param;
use crate::plan::{JoinClause, JoinKind, Query, QueryPlan, SubQuery};
use crate::relation::{Relation, Scope};
use crate::row::{FromRow, RowExt};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, ToSql};

/// The outcome of a write finisher run through [`Dao::with_result`].
#[derive(Debug)]
pub struct ResultInfo {
    pub rows_affected: u64,
    pub error: Option<DaoError>,
}

/// A query chain for the model type `T`.
pub struct Dao<T> {
    plan: QueryPlan,
    err: Option<ChainError>,
    _model: PhantomData<fn() -> T>,
}

impl<T> Clone for Dao<T> {
    fn clone(&self) -> Self {
        Self {
            plan: self.plan.clone(),
            err: self.err.clone(),
            _model: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Dao<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao")
            .field("plan", &self.plan)
            .field("err", &self.err)
            .finish()
    }
}

impl<T: Model> Default for Dao<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a chain over one or more derived tables instead of a model table.
///
/// The resulting chain selects `*`; an empty sub-query list leaves the chain
/// unbound and the next finisher fails.
pub fn table<T: Model>(subs: Vec<SubQuery>) -> Dao<T> {
    let mut dao = Dao {
        plan: QueryPlan::default(),
        err: None,
        _model: PhantomData,
    };
    if subs.is_empty() {
        dao.err = Some(ChainError::Invalid(
            "derived-table chain requires at least one sub-query".to_string(),
        ));
    } else {
        dao.plan.from_subs = subs;
    }
    dao
}

impl<T: Model> Dao<T> {
    /// Start a chain over the model's table.
    pub fn new() -> Self {
        Self {
            plan: QueryPlan::for_table(T::TABLE),
            err: None,
            _model: PhantomData,
        }
    }

    fn chain(mut self, f: impl FnOnce(&mut QueryPlan)) -> Self {
        if self.err.is_none() {
            f(&mut self.plan);
        }
        self
    }

    fn fail(mut self, err: ChainError) -> Self {
        if self.err.is_none() {
            self.err = Some(err);
        }
        self
    }

    // ---- chain verbs -------------------------------------------------

    /// Alias the source table. The alias applies to this chain only; a chain
    /// built over this one as a sub-query starts with no alias of its own.
    pub fn as_alias(self, alias: &str) -> Self {
        if !ident::is_valid(alias) {
            return self.fail(ChainError::Invalid(format!("invalid alias: {alias:?}")));
        }
        self.chain(|p| p.alias = Some(alias.to_string()))
    }

    /// The current alias, if one is set.
    pub fn alias(&self) -> Option<&str> {
        self.plan.alias.as_deref()
    }

    pub fn distinct(self) -> Self {
        self.chain(|p| p.distinct = true)
    }

    /// Replace the select list with explicit columns or expressions. An
    /// empty list leaves the current projection untouched.
    pub fn select(self, columns: Vec<&str>) -> Self {
        if columns.is_empty() {
            return self;
        }
        self.chain(|p| p.selects = columns.into_iter().map(|c| c.to_string()).collect())
    }

    /// Drop columns from the default model select list.
    pub fn omit(self, columns: Vec<&str>) -> Self {
        self.chain(|p| p.omits.extend(columns.into_iter().map(|c| c.to_string())))
    }

    /// AND the conjunction of `conds` onto the chain. An empty list is a
    /// no-op, so the chain is an identity under empty input.
    pub fn where_(self, conds: Vec<Cond>) -> Self {
        self.chain(|p| p.push_and(Cond::and(conds)))
    }

    /// OR the conjunction of `conds` onto the chain: `... OR (a AND b)`.
    pub fn or_(self, conds: Vec<Cond>) -> Self {
        self.chain(|p| p.push_or(Cond::and(conds)))
    }

    /// AND the negated conjunction of `conds` onto the chain.
    pub fn not_(self, conds: Vec<Cond>) -> Self {
        self.chain(|p| p.push_and(Cond::not(conds)))
    }

    /// Derive conditions from a filter value and AND them onto the chain.
    /// Field names resolve against this chain's table (or alias).
    pub fn filter<V: Filterable>(self, value: &V) -> Self {
        self.chain(|p| {
            let resolver = TableResolver::new(p.effective_table());
            for cond in derive_conditions(&resolver, value) {
                p.push_and(cond);
            }
        })
    }

    pub fn order(self, orders: Vec<OrderExpr>) -> Self {
        self.chain(|p| p.orders.extend(orders))
    }

    pub fn group(self, columns: Vec<&str>) -> Self {
        self.chain(|p| p.groups.extend(columns.into_iter().map(|c| c.to_string())))
    }

    pub fn having(self, conds: Vec<Cond>) -> Self {
        self.chain(|p| {
            let cond = Cond::and(conds);
            if !cond.is_inert() {
                p.havings.push(cond);
            }
        })
    }

    pub fn limit(self, limit: i64) -> Self {
        self.chain(|p| p.limit = Some(limit))
    }

    pub fn offset(self, offset: i64) -> Self {
        self.chain(|p| p.offset = Some(offset))
    }

    pub fn join(self, table: &str, on: Vec<Cond>) -> Self {
        self.join_kind(JoinKind::Inner, table, on)
    }

    pub fn left_join(self, table: &str, on: Vec<Cond>) -> Self {
        self.join_kind(JoinKind::Left, table, on)
    }

    pub fn right_join(self, table: &str, on: Vec<Cond>) -> Self {
        self.join_kind(JoinKind::Right, table, on)
    }

    /// An explicit join must say how the tables relate; zero conditions is a
    /// deferred error, not a cross join.
    fn join_kind(self, kind: JoinKind, table: &str, on: Vec<Cond>) -> Self {
        if !ident::is_valid(table) {
            return self.fail(ChainError::Invalid(format!("invalid join table: {table:?}")));
        }
        if on.is_empty() {
            return self.fail(ChainError::EmptyCondition(format!(
                "join on {table} requires at least one condition"
            )));
        }
        self.chain(|p| {
            p.joins.push(JoinClause {
                kind,
                table: table.to_string(),
                alias: None,
                on,
            })
        })
    }

    /// Join through a relation descriptor. The key linkage comes from the
    /// descriptor, so no explicit conditions are required.
    pub fn join_relation(self, relation: &Relation) -> Self {
        if self.err.is_some() {
            return self;
        }
        let mut this = self;
        this.plan = relation.merge_join(this.plan);
        this
    }

    /// Record a relation for batch loading alongside the main result. The
    /// chain's own clauses are untouched; use
    /// [`load_related`](crate::relation::load_related) with the fetched
    /// parents to resolve it.
    pub fn preload(self, relation: Relation) -> Self {
        self.chain(|p| p.preloads.push(relation))
    }

    /// Relations recorded by [`preload`](Dao::preload).
    pub fn preloads(&self) -> &[Relation] {
        &self.plan.preloads
    }

    /// Seed values for `first_or_*`, applied only when creating.
    pub fn attrs(self, assigns: Vec<Assign>) -> Self {
        self.chain(|p| p.attrs.extend(assigns))
    }

    /// Values for `first_or_create`, applied whether found or created.
    pub fn assign(self, assigns: Vec<Assign>) -> Self {
        self.chain(|p| p.assigns.extend(assigns))
    }

    /// Apply reusable plan transformations to the chain, in order.
    pub fn scopes(self, fns: Vec<Scope>) -> Self {
        if self.err.is_some() {
            return self;
        }
        let mut this = self;
        for scope in &fns {
            this.plan = scope.apply(this.plan);
        }
        this
    }

    /// Lift the guard that blocks UPDATE/DELETE without a WHERE clause.
    pub fn unscoped(self) -> Self {
        self.chain(|p| p.unscoped = true)
    }

    /// Append a RETURNING clause to write statements. An empty list is a
    /// no-op.
    pub fn returning(self, columns: Vec<&str>) -> Self {
        if columns.is_empty() {
            return self;
        }
        self.chain(|p| p.returning = columns.into_iter().map(|c| c.to_string()).collect())
    }

    /// Close the chain into a sub-query for embedding in another builder.
    /// A deferred error is preserved inside the sub-plan.
    pub fn into_subquery(mut self) -> SubQuery {
        if let Some(err) = self.err.take() {
            let msg = match err {
                ChainError::EmptyCondition(m) | ChainError::Invalid(m) => m,
            };
            self.plan.push_and(Cond::Invalid(msg));
        }
        SubQuery::from_plan(self.plan)
    }

    // ---- compilation -------------------------------------------------

    fn guard(&self) -> DaoResult<()> {
        if let Some(err) = &self.err {
            return Err(err.clone().into());
        }
        if let Some(msg) = self.plan.clause_error() {
            return Err(DaoError::invalid(msg));
        }
        if self.plan.table.is_empty() && self.plan.from_subs.is_empty() {
            return Err(DaoError::invalid("chain is not bound to a table"));
        }
        Ok(())
    }

    fn model_cols(&self) -> Option<&'static [&'static str]> {
        if self.plan.from_subs.is_empty() {
            Some(T::COLUMNS)
        } else {
            None
        }
    }

    /// Compile the SELECT without executing it.
    pub fn to_sql(&self) -> DaoResult<Query> {
        self.guard()?;
        Ok(self.plan.select_query(self.model_cols()))
    }

    /// Compile the COUNT without executing it.
    pub fn to_count_sql(&self) -> DaoResult<Query> {
        self.guard()?;
        Ok(self.plan.count_query())
    }

    // ---- read finishers ----------------------------------------------

    pub async fn count(&self, conn: &impl GenericClient) -> DaoResult<i64> {
        let query = self.to_count_sql()?;
        trace_query(&query.sql, query.params.len());
        let row = conn.query_one(&query.sql, &query.params.as_refs()).await?;
        row.try_get(0)
            .map_err(|e| DaoError::decode("count", e.to_string()))
    }

    /// All matching rows.
    pub async fn find(&self, conn: &impl GenericClient) -> DaoResult<Vec<T>> {
        let query = self.to_sql()?;
        trace_query(&query.sql, query.params.len());
        let rows = conn.query(&query.sql, &query.params.as_refs()).await?;
        rows.iter().map(T::from_row).collect()
    }

    /// First row by primary key order. Missing rows are a
    /// [`DaoError::NotFound`].
    pub async fn first(&self, conn: &impl GenericClient) -> DaoResult<T> {
        self.one(conn, Some(false)).await
    }

    /// Last row by primary key order.
    pub async fn last(&self, conn: &impl GenericClient) -> DaoResult<T> {
        self.one(conn, Some(true)).await
    }

    /// One row in whatever order the chain already has.
    pub async fn take(&self, conn: &impl GenericClient) -> DaoResult<T> {
        self.one(conn, None).await
    }

    async fn one(&self, conn: &impl GenericClient, pk_desc: Option<bool>) -> DaoResult<T> {
        self.guard()?;
        let mut plan = self.plan.clone();
        if let Some(desc) = pk_desc
            && plan.orders.is_empty()
        {
            let pk = Field::<i64>::new(plan.effective_table(), T::PRIMARY_KEY);
            plan.orders.push(if desc { pk.desc() } else { pk.asc() });
        }
        plan.limit = Some(1);
        let query = plan.select_query(self.model_cols());
        trace_query(&query.sql, query.params.len());
        match conn.query_opt(&query.sql, &query.params.as_refs()).await? {
            Some(row) => T::from_row(&row),
            None => Err(DaoError::not_found(format!("no {} row matched", T::TABLE))),
        }
    }

    /// Like [`first`](Dao::first), but a missing row yields a default
    /// instance instead of an error. Nothing is written.
    pub async fn first_or_init(&self, conn: &impl GenericClient) -> DaoResult<T> {
        match self.first(conn).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_not_found() => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    /// Fetch rows page by page. Each page is handed to `f` together with a
    /// fresh chain scoped to that window and the 1-based batch number, so
    /// follow-up operations inside the callback hit exactly the batch's
    /// rows. An error from `f` aborts the remaining batches.
    ///
    /// Windows are cut with LIMIT/OFFSET, so a stable order is required;
    /// when the chain has none, primary key order is applied.
    pub async fn find_in_batches<F>(
        &self,
        conn: &impl GenericClient,
        batch_size: i64,
        mut f: F,
    ) -> DaoResult<()>
    where
        F: FnMut(Dao<T>, &[T], usize) -> DaoResult<()>,
    {
        self.guard()?;
        if batch_size <= 0 {
            return Err(DaoError::invalid("batch size must be positive"));
        }
        let mut base = self.clone();
        if base.plan.orders.is_empty() {
            let pk = Field::<i64>::new(base.plan.effective_table(), T::PRIMARY_KEY);
            base.plan.orders.push(pk.asc());
        }
        let mut offset = base.plan.offset.unwrap_or(0);
        let mut batch = 0usize;
        loop {
            let mut window = base.clone();
            window.plan.limit = Some(batch_size);
            window.plan.offset = Some(offset);
            let query = window.plan.select_query(self.model_cols());
            trace_query(&query.sql, query.params.len());
            let rows = conn.query(&query.sql, &query.params.as_refs()).await?;
            if rows.is_empty() {
                return Ok(());
            }
            let items: Vec<T> = rows.iter().map(T::from_row).collect::<DaoResult<_>>()?;
            batch += 1;
            let last_window = (items.len() as i64) < batch_size;
            f(window, &items, batch)?;
            if last_window {
                return Ok(());
            }
            offset += batch_size;
        }
    }

    /// Raw rows for the compiled SELECT.
    pub async fn rows(&self, conn: &impl GenericClient) -> DaoResult<Vec<Row>> {
        let query = self.to_sql()?;
        trace_query(&query.sql, query.params.len());
        conn.query(&query.sql, &query.params.as_refs()).await
    }

    /// A single raw row.
    pub async fn row(&self, conn: &impl GenericClient) -> DaoResult<Row> {
        let query = self.to_sql()?;
        trace_query(&query.sql, query.params.len());
        conn.query_one(&query.sql, &query.params.as_refs()).await
    }

    /// Map the result set into any row-mappable type, for aggregate or
    /// projected selects that do not line up with the model.
    pub async fn scan<U: FromRow>(&self, conn: &impl GenericClient) -> DaoResult<Vec<U>> {
        self.guard()?;
        let query = self.plan.select_query(None);
        trace_query(&query.sql, query.params.len());
        let rows = conn.query(&query.sql, &query.params.as_refs()).await?;
        rows.iter().map(U::from_row).collect()
    }

    /// Collect a single column from every matching row.
    pub async fn pluck<U>(&self, conn: &impl GenericClient, field: &Field<U>) -> DaoResult<Vec<U>>
    where
        U: for<'a> FromSql<'a>,
    {
        self.guard()?;
        let mut plan = self.plan.clone();
        plan.selects = vec![field.col().to_sql()];
        let query = plan.select_query(None);
        trace_query(&query.sql, query.params.len());
        let rows = conn.query(&query.sql, &query.params.as_refs()).await?;
        rows.iter()
            .map(|row| row.try_get_column(field.col().name()))
            .collect()
    }

    // ---- write finishers ---------------------------------------------

    /// Update one column. Returns the number of affected rows.
    pub async fn update<V>(
        &self,
        conn: &impl GenericClient,
        column: &str,
        value: V,
    ) -> DaoResult<u64>
    where
        V: ToSql + Send + Sync + 'static,
    {
        ident::validate(column)?;
        self.run_update(conn, vec![Assign::value(column, value)])
            .await
    }

    /// Write one column directly, without consulting any assignment source.
    pub async fn update_column<V>(
        &self,
        conn: &impl GenericClient,
        column: &str,
        value: V,
    ) -> DaoResult<u64>
    where
        V: ToSql + Send + Sync + 'static,
    {
        self.update(conn, column, value).await
    }

    /// Update through a prepared assignment (expression, sub-query, or
    /// column tuple). An empty assignment updates nothing and reports zero
    /// affected rows.
    pub async fn update_expr(&self, conn: &impl GenericClient, assign: Assign) -> DaoResult<u64> {
        self.run_update(conn, vec![assign]).await
    }

    /// Build the SET clause solely from explicit assignments. Nothing is
    /// filtered or skipped, so a column can be deliberately written to its
    /// zero value.
    pub async fn update_simple(
        &self,
        conn: &impl GenericClient,
        assigns: Vec<Assign>,
    ) -> DaoResult<u64> {
        self.run_update(conn, assigns).await
    }

    /// Same as [`update_simple`](Dao::update_simple), writing the columns
    /// directly.
    pub async fn update_column_simple(
        &self,
        conn: &impl GenericClient,
        assigns: Vec<Assign>,
    ) -> DaoResult<u64> {
        self.run_update(conn, assigns).await
    }

    /// Update from any assignment source. When the source is a different
    /// type than the model (an assignment list, a JSON map, another model),
    /// assignments are restricted to the model's own columns.
    pub async fn updates<V>(&self, conn: &impl GenericClient, value: &V) -> DaoResult<u64>
    where
        V: AssignSource + Any,
    {
        self.run_update(conn, self.retargeted_assignments(value)).await
    }

    /// [`updates`](Dao::updates), writing the columns directly.
    pub async fn update_columns<V>(&self, conn: &impl GenericClient, value: &V) -> DaoResult<u64>
    where
        V: AssignSource + Any,
    {
        self.run_update(conn, self.retargeted_assignments(value)).await
    }

    fn retargeted_assignments<V: AssignSource + Any>(&self, value: &V) -> Vec<Assign> {
        let mut assigns = value.assignments();
        if TypeId::of::<V>() != TypeId::of::<T>() {
            assigns.retain(|a| {
                a.column_names()
                    .iter()
                    .all(|name| T::COLUMNS.contains(name))
            });
        }
        assigns
    }

    async fn run_update(&self, conn: &impl GenericClient, assigns: Vec<Assign>) -> DaoResult<u64> {
        self.guard()?;
        match self.plan.update_query(&assigns) {
            Some(query) => {
                trace_query(&query.sql, query.params.len());
                conn.execute(&query.sql, &query.params.as_refs()).await
            }
            None => Ok(0),
        }
    }

    /// Delete the matching rows. Without a WHERE clause the statement is
    /// guarded to affect nothing unless the chain is [`unscoped`](Dao::unscoped).
    pub async fn delete(&self, conn: &impl GenericClient) -> DaoResult<u64> {
        self.guard()?;
        let query = self.plan.delete_query();
        trace_query(&query.sql, query.params.len());
        conn.execute(&query.sql, &query.params.as_refs()).await
    }

    /// Delete specific model instances by primary key.
    pub async fn delete_models(&self, conn: &impl GenericClient, models: &[T]) -> DaoResult<u64> {
        if models.is_empty() {
            return Ok(0);
        }
        let pk = Field::<i64>::new(self.plan.effective_table(), T::PRIMARY_KEY);
        let params: Vec<Param> = models.iter().map(|m| m.primary_key_param()).collect();
        let scoped = self.clone().where_(vec![Cond::in_values(
            vec![pk.col().clone()],
            params,
            false,
        )]);
        scoped.delete(conn).await
    }

    /// Run a write finisher against a fork of this chain and fold its
    /// outcome into a [`ResultInfo`]. The chain itself is left untouched.
    pub async fn with_result<F, Fut>(&self, f: F) -> ResultInfo
    where
        F: FnOnce(Dao<T>) -> Fut,
        Fut: Future<Output = DaoResult<u64>>,
    {
        match f(self.clone()).await {
            Ok(rows_affected) => ResultInfo {
                rows_affected,
                error: None,
            },
            Err(error) => ResultInfo {
                rows_affected: 0,
                error: Some(error),
            },
        }
    }
}

impl<T: InsertRow> Dao<T> {
    /// Insert one row.
    pub async fn create(&self, conn: &impl GenericClient, model: &T) -> DaoResult<u64> {
        self.create_batch(conn, std::slice::from_ref(model)).await
    }

    /// Insert many rows in one statement.
    pub async fn create_batch(&self, conn: &impl GenericClient, models: &[T]) -> DaoResult<u64> {
        self.guard()?;
        if models.is_empty() {
            return Ok(0);
        }
        let rows: Vec<Vec<Param>> = models.iter().map(T::insert_params).collect();
        let query = self.plan.insert_query(T::insert_columns(), rows, None)?;
        trace_query(&query.sql, query.params.len());
        conn.execute(&query.sql, &query.params.as_refs()).await
    }

    /// Insert many rows, `batch_size` rows per statement.
    pub async fn create_in_batches(
        &self,
        conn: &impl GenericClient,
        models: &[T],
        batch_size: usize,
    ) -> DaoResult<u64> {
        if batch_size == 0 {
            return Err(DaoError::invalid("batch size must be positive"));
        }
        let mut total = 0;
        for chunk in models.chunks(batch_size) {
            total += self.create_batch(conn, chunk).await?;
        }
        Ok(total)
    }

    /// Insert or overwrite by primary key.
    pub async fn save(&self, conn: &impl GenericClient, model: &T) -> DaoResult<u64> {
        self.guard()?;
        let mut columns: Vec<&str> = Vec::new();
        let mut row: Vec<Param> = Vec::new();
        if !T::insert_columns().contains(&T::PRIMARY_KEY) {
            columns.push(T::PRIMARY_KEY);
            row.push(model.primary_key_param());
        }
        columns.extend_from_slice(T::insert_columns());
        row.extend(model.insert_params());
        let query = self
            .plan
            .insert_query(&columns, vec![row], Some(T::PRIMARY_KEY))?;
        trace_query(&query.sql, query.params.len());
        conn.execute(&query.sql, &query.params.as_refs()).await
    }

    /// Like [`first`](Dao::first), but a missing row is created from the
    /// chain's [`attrs`](Dao::attrs) and [`assign`](Dao::assign) values and
    /// returned via `RETURNING *`.
    pub async fn first_or_create(&self, conn: &impl GenericClient) -> DaoResult<T> {
        match self.first(conn).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_not_found() => self.create_from_assignments(conn).await,
            Err(e) => Err(e),
        }
    }

    async fn create_from_assignments(&self, conn: &impl GenericClient) -> DaoResult<T> {
        let mut columns: Vec<String> = Vec::new();
        let mut row: Vec<Param> = Vec::new();
        for assign in self.plan.attrs.iter().chain(self.plan.assigns.iter()) {
            let names = assign.column_names();
            let (Some(name), AssignValue::Value(param)) = (names.first(), &assign.value) else {
                return Err(DaoError::invalid(
                    "first_or_create accepts plain column/value assignments only",
                ));
            };
            columns.push((*name).to_string());
            row.push(param.clone());
        }
        if columns.is_empty() {
            return Err(DaoError::invalid(
                "first_or_create requires attrs or assign values",
            ));
        }
        let mut plan = self.plan.clone();
        plan.returning = vec!["*".to_string()];
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        let query = plan.insert_query(&names, vec![row], None)?;
        trace_query(&query.sql, query.params.len());
        let inserted = conn.query_one(&query.sql, &query.params.as_refs()).await?;
        T::from_row(&inserted)
    }
}

fn trace_query(sql: &str, param_count: usize) {
    #[cfg(feature = "tracing")]
    tracing::debug!(sql, param_count, "executing statement");
    #[cfg(not(feature = "tracing"))]
    {
        let _ = (sql, param_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ColumnRef;
    use std::sync::Mutex;

    #[derive(Debug, Default, PartialEq)]
    struct User {
        id: i64,
        name: String,
        age: i32,
    }

    impl FromRow for User {
        fn from_row(row: &Row) -> DaoResult<Self> {
            Ok(Self {
                id: row.try_get_column("id")?,
                name: row.try_get_column("name")?,
                age: row.try_get_column("age")?,
            })
        }
    }

    impl Model for User {
        const TABLE: &'static str = "users";
        const COLUMNS: &'static [&'static str] = &["id", "name", "age"];
        const PRIMARY_KEY: &'static str = "id";

        fn primary_key_param(&self) -> Param {
            Param::new(self.id)
        }
    }

    impl InsertRow for User {
        fn insert_columns() -> &'static [&'static str] {
            &["name", "age"]
        }

        fn insert_params(&self) -> Vec<Param> {
            vec![Param::new(self.name.clone()), Param::new(self.age)]
        }
    }

    impl AssignSource for User {
        fn assignments(&self) -> Vec<Assign> {
            let mut out = Vec::new();
            if !self.name.is_empty() {
                out.push(Assign::value("name", self.name.clone()));
            }
            if self.age != 0 {
                out.push(Assign::value("age", self.age));
            }
            out
        }
    }

    fn age() -> Field<i32> {
        Field::new("users", "age")
    }

    fn name() -> Field<String> {
        Field::new("users", "name")
    }

    /// Records every statement; returns no rows and a fixed execute count.
    #[derive(Default)]
    struct MockClient {
        statements: Mutex<Vec<(String, usize)>>,
        execute_result: u64,
    }

    impl MockClient {
        fn last_sql(&self) -> String {
            let guard = self.statements.lock().unwrap();
            guard.last().map(|(sql, _)| sql.clone()).unwrap_or_default()
        }

        fn record(&self, sql: &str, params: usize) {
            self.statements.lock().unwrap().push((sql.to_string(), params));
        }
    }

    impl GenericClient for MockClient {
        async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> DaoResult<Vec<Row>> {
            self.record(sql, params.len());
            Ok(Vec::new())
        }

        async fn query_opt(
            &self,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> DaoResult<Option<Row>> {
            self.record(sql, params.len());
            Ok(None)
        }

        async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> DaoResult<u64> {
            self.record(sql, params.len());
            Ok(self.execute_result)
        }
    }

    #[test]
    fn empty_where_is_identity() {
        let q = Dao::<User>::new().where_(vec![]).to_sql().unwrap();
        assert_eq!(q.sql, "SELECT id, name, age FROM users");
    }

    #[test]
    fn or_groups_each_call() {
        let q = Dao::<User>::new()
            .where_(vec![age().gt(18)])
            .or_(vec![age().lt(10), name().eq("x".into())])
            .or_(vec![name().eq("y".into())])
            .to_sql()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT id, name, age FROM users WHERE users.age > $1 \
             OR (users.age < $2 AND users.name = $3) OR users.name = $4"
        );
    }

    #[test]
    fn not_negates_the_conjunction() {
        let q = Dao::<User>::new()
            .not_(vec![age().gte(18), age().lte(60)])
            .to_sql()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT id, name, age FROM users WHERE NOT (users.age >= $1 AND users.age <= $2)"
        );
    }

    #[test]
    fn clone_forks_the_chain() {
        let base = Dao::<User>::new().where_(vec![age().gt(18)]);
        let a = base.clone().where_(vec![name().eq("a".into())]);
        let b = base.where_(vec![name().eq("b".into())]);
        assert_eq!(a.to_sql().unwrap().params.len(), 2);
        assert_eq!(b.to_sql().unwrap().params.len(), 2);
    }

    #[test]
    fn alias_applies_to_from_clause() {
        let q = Dao::<User>::new().as_alias("u").to_sql().unwrap();
        assert_eq!(q.sql, "SELECT id, name, age FROM users AS u");
    }

    #[test]
    fn invalid_alias_fails_at_finish() {
        let err = Dao::<User>::new().as_alias("u;drop").to_sql().unwrap_err();
        assert!(matches!(err, DaoError::Invalid(_)));
    }

    #[test]
    fn join_requires_conditions() {
        let err = Dao::<User>::new().join("orders", vec![]).to_sql().unwrap_err();
        assert!(err.is_empty_condition());
    }

    #[test]
    fn error_sticks_through_later_verbs() {
        let err = Dao::<User>::new()
            .join("orders", vec![])
            .where_(vec![age().gt(1)])
            .limit(5)
            .to_sql()
            .unwrap_err();
        assert!(err.is_empty_condition());
    }

    #[test]
    fn join_qualifies_model_columns() {
        let uid = Field::<i64>::new("users", "id");
        let ouid = Field::<i64>::new("orders", "user_id");
        let q = Dao::<User>::new()
            .join("orders", vec![ouid.eq_col(&uid)])
            .to_sql()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT users.id, users.name, users.age FROM users \
             INNER JOIN orders ON orders.user_id = users.id"
        );
    }

    #[test]
    fn relation_join_needs_no_conditions() {
        let rel = Relation::new("orders", "orders", "user_id", ColumnRef::new("users", "id"));
        let q = Dao::<User>::new().join_relation(&rel).to_sql().unwrap();
        assert!(q.sql.contains("LEFT JOIN orders ON orders.user_id = users.id"));
    }

    #[test]
    fn relation_select_rides_alongside_model_columns() {
        let rel = Relation::new("orders", "orders", "user_id", ColumnRef::new("users", "id"))
            .select(vec!["total"]);
        let q = Dao::<User>::new().join_relation(&rel).to_sql().unwrap();
        assert_eq!(
            q.sql,
            "SELECT users.id, users.name, users.age, orders.total FROM users \
             LEFT JOIN orders ON orders.user_id = users.id"
        );
    }

    #[test]
    fn subquery_round_trip() {
        let sub = Dao::<User>::new()
            .select(vec!["id"])
            .where_(vec![age().gt(18)])
            .into_subquery();
        let q = table::<User>(vec![sub]).to_sql().unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM (SELECT id FROM users WHERE users.age > $1) AS sub_1"
        );
    }

    #[test]
    fn aliased_subquery_names_the_derived_table_once() {
        let sub = Dao::<User>::new()
            .select(vec!["id"])
            .as_alias("adults")
            .into_subquery();
        let q = table::<User>(vec![sub]).to_sql().unwrap();
        assert_eq!(q.sql, "SELECT * FROM (SELECT id FROM users) AS adults");
    }

    #[test]
    fn empty_select_keeps_projection() {
        let q = Dao::<User>::new()
            .select(vec!["id"])
            .select(vec![])
            .to_sql()
            .unwrap();
        assert_eq!(q.sql, "SELECT id FROM users");
    }

    #[test]
    fn derived_chain_does_not_inherit_alias() {
        let sub = Dao::<User>::new().as_alias("adults").into_subquery();
        let outer = table::<User>(vec![sub]);
        assert_eq!(outer.alias(), None);
    }

    #[test]
    fn empty_derived_chain_is_unbound() {
        let err = table::<User>(vec![]).to_sql().unwrap_err();
        assert!(matches!(err, DaoError::Invalid(_)));
    }

    #[test]
    fn subquery_in_condition() {
        let ids = Dao::<User>::new()
            .select(vec!["id"])
            .where_(vec![age().gt(30)])
            .into_subquery();
        let q = Dao::<User>::new()
            .where_(vec![Field::<i64>::new("users", "id").in_query(ids)])
            .to_sql()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT id, name, age FROM users \
             WHERE users.id IN (SELECT id FROM users WHERE users.age > $1)"
        );
    }

    #[test]
    fn erroneous_subquery_fails_outer_chain() {
        let bad = Dao::<User>::new().join("orders", vec![]).into_subquery();
        let err = table::<User>(vec![bad]).to_sql().unwrap_err();
        assert!(matches!(err, DaoError::Invalid(_)));
    }

    #[tokio::test]
    async fn first_orders_by_pk_and_limits() {
        let conn = MockClient::default();
        let err = Dao::<User>::new().first(&conn).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            conn.last_sql(),
            "SELECT id, name, age FROM users ORDER BY users.id LIMIT 1"
        );
    }

    #[tokio::test]
    async fn last_orders_by_pk_desc() {
        let conn = MockClient::default();
        let _ = Dao::<User>::new().last(&conn).await;
        assert_eq!(
            conn.last_sql(),
            "SELECT id, name, age FROM users ORDER BY users.id DESC LIMIT 1"
        );
    }

    #[tokio::test]
    async fn take_keeps_existing_order() {
        let conn = MockClient::default();
        let _ = Dao::<User>::new().order(vec![age().desc()]).take(&conn).await;
        assert_eq!(
            conn.last_sql(),
            "SELECT id, name, age FROM users ORDER BY users.age DESC LIMIT 1"
        );
    }

    #[tokio::test]
    async fn first_or_init_defaults_on_missing_row() {
        let conn = MockClient::default();
        let user = Dao::<User>::new()
            .where_(vec![name().eq("ghost".into())])
            .first_or_init(&conn)
            .await
            .unwrap();
        assert_eq!(user, User::default());
    }

    #[tokio::test]
    async fn update_compiles_set_and_where() {
        let conn = MockClient {
            execute_result: 3,
            ..Default::default()
        };
        let n = Dao::<User>::new()
            .where_(vec![age().lt(18)])
            .update(&conn, "age", 18i32)
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            conn.last_sql(),
            "UPDATE users SET age = $1 WHERE users.age < $2"
        );
    }

    #[tokio::test]
    async fn update_without_where_is_guarded() {
        let conn = MockClient::default();
        Dao::<User>::new().update(&conn, "age", 1i32).await.unwrap();
        assert_eq!(conn.last_sql(), "UPDATE users SET age = $1 WHERE 1=0");
    }

    #[tokio::test]
    async fn updates_from_model_skips_zero_fields() {
        let conn = MockClient::default();
        let patch = User {
            id: 0,
            name: String::new(),
            age: 31,
        };
        Dao::<User>::new()
            .where_(vec![name().eq("a".into())])
            .updates(&conn, &patch)
            .await
            .unwrap();
        assert_eq!(
            conn.last_sql(),
            "UPDATE users SET age = $1 WHERE users.name = $2"
        );
    }

    #[tokio::test]
    async fn updates_from_json_filters_unknown_columns() {
        let conn = MockClient::default();
        let mut map = serde_json::Map::new();
        map.insert("age".into(), serde_json::json!(20));
        map.insert("stray".into(), serde_json::json!("x"));
        Dao::<User>::new()
            .where_(vec![age().gt(0)])
            .updates(&conn, &map)
            .await
            .unwrap();
        assert_eq!(
            conn.last_sql(),
            "UPDATE users SET age = $1 WHERE users.age > $2"
        );
    }

    #[tokio::test]
    async fn update_simple_writes_zero_values() {
        let conn = MockClient::default();
        Dao::<User>::new()
            .where_(vec![name().eq("a".into())])
            .update_simple(&conn, vec![Assign::value("age", 0i32)])
            .await
            .unwrap();
        assert_eq!(
            conn.last_sql(),
            "UPDATE users SET age = $1 WHERE users.name = $2"
        );
    }

    #[test]
    fn scopes_apply_in_order() {
        let paginate = Scope::new(|mut plan| {
            plan.limit = Some(10);
            plan
        });
        let q = Dao::<User>::new().scopes(vec![paginate]).to_sql().unwrap();
        assert_eq!(q.sql, "SELECT id, name, age FROM users LIMIT 10");
    }

    #[tokio::test]
    async fn updates_with_nothing_left_affects_zero_without_executing() {
        let conn = MockClient::default();
        let n = Dao::<User>::new()
            .where_(vec![age().gt(0)])
            .updates(&conn, &Vec::<Assign>::new())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(conn.statements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_models_scopes_by_primary_key() {
        let conn = MockClient::default();
        let users = vec![
            User { id: 1, ..Default::default() },
            User { id: 2, ..Default::default() },
        ];
        Dao::<User>::new().delete_models(&conn, &users).await.unwrap();
        assert_eq!(conn.last_sql(), "DELETE FROM users WHERE users.id IN ($1, $2)");
    }

    #[tokio::test]
    async fn unscoped_delete_hits_everything() {
        let conn = MockClient::default();
        Dao::<User>::new().unscoped().delete(&conn).await.unwrap();
        assert_eq!(conn.last_sql(), "DELETE FROM users");
    }

    #[tokio::test]
    async fn create_batch_compiles_multi_row_insert() {
        let conn = MockClient {
            execute_result: 2,
            ..Default::default()
        };
        let users = vec![
            User { name: "a".into(), age: 1, ..Default::default() },
            User { name: "b".into(), age: 2, ..Default::default() },
        ];
        let n = Dao::<User>::new().create_batch(&conn, &users).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            conn.last_sql(),
            "INSERT INTO users (name, age) VALUES ($1, $2), ($3, $4)"
        );
    }

    #[tokio::test]
    async fn save_upserts_on_primary_key() {
        let conn = MockClient::default();
        let user = User { id: 7, name: "a".into(), age: 1 };
        Dao::<User>::new().save(&conn, &user).await.unwrap();
        assert_eq!(
            conn.last_sql(),
            "INSERT INTO users (id, name, age) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, age = EXCLUDED.age"
        );
    }

    #[tokio::test]
    async fn find_in_batches_stops_on_empty_page() {
        let conn = MockClient::default();
        let mut calls = 0usize;
        Dao::<User>::new()
            .find_in_batches(&conn, 100, |_, _, _| {
                calls += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(
            conn.last_sql(),
            "SELECT id, name, age FROM users ORDER BY users.id LIMIT 100 OFFSET 0"
        );
    }

    #[tokio::test]
    async fn find_in_batches_keeps_existing_order() {
        let conn = MockClient::default();
        Dao::<User>::new()
            .order(vec![age().desc()])
            .find_in_batches(&conn, 50, |_, _, _| Ok(()))
            .await
            .unwrap();
        assert_eq!(
            conn.last_sql(),
            "SELECT id, name, age FROM users ORDER BY users.age DESC LIMIT 50 OFFSET 0"
        );
    }

    #[tokio::test]
    async fn find_in_batches_rejects_bad_size() {
        let conn = MockClient::default();
        let err = Dao::<User>::new()
            .find_in_batches(&conn, 0, |_, _, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, DaoError::Invalid(_)));
    }

    #[tokio::test]
    async fn pluck_selects_the_single_column() {
        let conn = MockClient::default();
        let out: Vec<String> = Dao::<User>::new().pluck(&conn, &name()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(conn.last_sql(), "SELECT users.name FROM users");
    }

    #[tokio::test]
    async fn with_result_folds_errors() {
        let conn = MockClient::default();
        let info = Dao::<User>::new()
            .join("orders", vec![])
            .with_result(|dao| async move { dao.delete(&conn).await })
            .await;
        assert_eq!(info.rows_affected, 0);
        assert!(info.error.as_ref().is_some_and(|e| e.is_empty_condition()));
    }

    #[tokio::test]
    async fn count_compiles() {
        let conn = MockClient::default();
        // The mock returns no row, so count itself errors; the statement is
        // still recorded.
        let _ = Dao::<User>::new().where_(vec![age().gt(1)]).count(&conn).await;
        assert_eq!(conn.last_sql(), "SELECT COUNT(*) FROM users WHERE users.age > $1");
    }

    #[tokio::test]
    async fn filter_derives_where_clauses() {
        use crate::derive::{CondRegistry, FieldValue, Filterable};

        #[derive(Default)]
        struct UserQuery {
            min_age: i32,
        }

        impl Filterable for UserQuery {
            fn registry() -> CondRegistry<Self> {
                CondRegistry::new()
                    .renamed("min_age", "age", "gte", |f: &Self| FieldValue::scalar(&f.min_age))
            }
        }

        let q = Dao::<User>::new()
            .filter(&UserQuery { min_age: 21 })
            .to_sql()
            .unwrap();
        assert_eq!(q.sql, "SELECT id, name, age FROM users WHERE users.age >= $1");
    }
}
