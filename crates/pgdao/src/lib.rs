//! # pgdao
//!
//! A chainable, type-parameterized query construction layer for Postgres.
//!
//! ## Features
//!
//! - **Copy-on-write chains**: every verb returns a new chain; `Clone` forks
//!   a shared base query into independent branches
//! - **Typed fields**: comparisons go through [`Field`] handles, so a column
//!   only accepts values of its own kind
//! - **Condition algebra**: AND/OR/NOT over a closed [`Cond`] tree, with
//!   placeholder numbering computed once at build time
//! - **Derived conditions**: plain filter structs register their fields once
//!   and turn into WHERE clauses, skipping unset values
//! - **Relations**: one descriptor drives both JOIN merging and batched
//!   `ANY($1)` loading
//! - **Deferred errors**: construction problems ride the chain and fail the
//!   next finisher instead of panicking mid-expression
//! - **Safe defaults**: UPDATE/DELETE without a WHERE clause affect nothing
//!   unless the chain is explicitly unscoped
//!
//! ```ignore
//! use pgdao::Dao;
//!
//! let adults = Dao::<User>::new()
//!     .where_(vec![user::age().gte(18)])
//!     .or_(vec![user::role().eq("admin".into()), user::active().eq(true)])
//!     .order(vec![user::age().desc()])
//!     .limit(10)
//!     .find(&client)
//!     .await?;
//! ```

pub mod client;
pub mod cond;
pub mod dao;
pub mod derive;
pub mod error;
pub mod field;
pub mod ident;
pub mod model;
pub mod param;
pub mod plan;
pub mod relation;
pub mod row;

pub use client::GenericClient;
pub use cond::Cond;
pub use dao::{Dao, ResultInfo, table};
pub use derive::{
    CondRegistry, FieldCond, FieldResolver, FieldValue, Filterable, TableResolver, ZeroValue,
    derive_conditions,
};
pub use error::{DaoError, DaoResult};
pub use field::{Assign, ColumnRef, Columns, Field, OrderExpr};
pub use model::{AssignSource, InsertRow, Model};
pub use param::{Param, ParamList};
pub use plan::{JoinKind, Query, QueryPlan, SubQuery};
pub use relation::{Relation, Scope, load_related};
pub use row::{FromRow, RowExt, scan_rows};
