//! Deriving conditions from plain filter values.
//!
//! A filter type registers its fields once in a [`CondRegistry`]: field name,
//! comparison operator, and an extractor that reads the value out of an
//! instance. Deriving walks the registry, skips unset fields, and maps the
//! rest to [`Cond`]s through a [`FieldResolver`]. Registries are built lazily
//! and cached per type for the life of the process.

use crate::cond::Cond;
use crate::field::ColumnRef;
use crate::param::Param;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tokio_postgres::types::ToSql;

/// Maps a registered field name to a column.
pub trait FieldResolver {
    fn resolve(&self, name: &str) -> Option<ColumnRef>;
}

impl FieldResolver for HashMap<String, ColumnRef> {
    fn resolve(&self, name: &str) -> Option<ColumnRef> {
        self.get(name).cloned()
    }
}

/// Resolves any valid identifier to a column on a fixed table.
#[derive(Clone, Debug)]
pub struct TableResolver {
    table: String,
}

impl TableResolver {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }
}

impl FieldResolver for TableResolver {
    fn resolve(&self, name: &str) -> Option<ColumnRef> {
        if crate::ident::is_valid(name) && !name.contains('.') {
            Some(ColumnRef::new(&self.table, name))
        } else {
            None
        }
    }
}

/// A value extracted from a filter field.
#[derive(Clone, Debug)]
pub enum FieldValue {
    /// Zero or absent; the field contributes no condition.
    Unset,
    One(Param),
    Many(Vec<Param>),
    /// A nested filter, already flattened against its own registry.
    Nested(Vec<FieldCond>),
}

impl FieldValue {
    /// Wrap a scalar, treating the type's zero value as unset.
    ///
    /// This conflates "not provided" with a genuine zero; filters that need
    /// to match zero should use an `Option` field and [`FieldValue::optional`].
    pub fn scalar<T>(value: &T) -> FieldValue
    where
        T: ToSql + ZeroValue + Clone + Send + Sync + 'static,
    {
        if value.is_zero() {
            FieldValue::Unset
        } else {
            FieldValue::One(Param::new(value.clone()))
        }
    }

    /// Wrap an optional scalar. `None` is unset; `Some` is always set, even
    /// when the inner value is zero.
    pub fn optional<T>(value: &Option<T>) -> FieldValue
    where
        T: ToSql + Clone + Send + Sync + 'static,
    {
        match value {
            None => FieldValue::Unset,
            Some(v) => FieldValue::One(Param::new(v.clone())),
        }
    }

    /// Wrap a value list. An empty list is unset.
    pub fn list<T>(values: &[T]) -> FieldValue
    where
        T: ToSql + Clone + Send + Sync + 'static,
    {
        if values.is_empty() {
            FieldValue::Unset
        } else {
            FieldValue::Many(values.iter().cloned().map(Param::new).collect())
        }
    }

    /// Wrap an optional nested filter. `None` is unset.
    pub fn nested<S: Filterable>(value: &Option<S>) -> FieldValue {
        match value {
            None => FieldValue::Unset,
            Some(v) => FieldValue::Nested(registry_for::<S>().apply(v)),
        }
    }
}

/// A field name, operator, and extracted value, ready for resolution.
#[derive(Clone, Debug)]
pub struct FieldCond {
    pub name: String,
    pub op: String,
    pub value: FieldValue,
}

struct RegisteredField<V> {
    name: &'static str,
    rename: Option<&'static str>,
    op: &'static str,
    extract: fn(&V) -> FieldValue,
}

/// The registered fields of one filter type.
pub struct CondRegistry<V> {
    fields: Vec<RegisteredField<V>>,
}

impl<V> Default for CondRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CondRegistry<V> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Register a field under its own name.
    pub fn field(mut self, name: &'static str, op: &'static str, extract: fn(&V) -> FieldValue) -> Self {
        self.fields.push(RegisteredField {
            name,
            rename: None,
            op,
            extract,
        });
        self
    }

    /// Register a field that resolves under a different column name.
    pub fn renamed(
        mut self,
        name: &'static str,
        column: &'static str,
        op: &'static str,
        extract: fn(&V) -> FieldValue,
    ) -> Self {
        self.fields.push(RegisteredField {
            name,
            rename: Some(column),
            op,
            extract,
        });
        self
    }

    /// Extract all set fields of `value` in registration order.
    pub fn apply(&self, value: &V) -> Vec<FieldCond> {
        self.fields
            .iter()
            .filter_map(|f| {
                let extracted = (f.extract)(value);
                if matches!(extracted, FieldValue::Unset) {
                    return None;
                }
                Some(FieldCond {
                    name: f.rename.unwrap_or(f.name).to_string(),
                    op: f.op.to_string(),
                    value: extracted,
                })
            })
            .collect()
    }
}

/// Filter types that can describe their own registry.
pub trait Filterable: Sized + 'static {
    fn registry() -> CondRegistry<Self>;
}

static REGISTRIES: OnceLock<Mutex<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>> =
    OnceLock::new();

/// The cached registry for `V`, built on first use.
pub fn registry_for<V: Filterable>() -> &'static CondRegistry<V> {
    let map = REGISTRIES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = match map.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(existing) = guard.get(&TypeId::of::<V>())
        && let Some(registry) = existing.downcast_ref::<CondRegistry<V>>()
    {
        return registry;
    }
    let leaked: &'static CondRegistry<V> = Box::leak(Box::new(V::registry()));
    guard.insert(TypeId::of::<V>(), leaked);
    leaked
}

/// Derive conditions from `value`, resolving field names through `resolver`.
///
/// Unset fields contribute nothing. Field names the resolver does not know,
/// unknown operators, and operator/value arity mismatches are skipped the
/// same way; derivation never fails, it only narrows what it can.
pub fn derive_conditions<V: Filterable>(resolver: &dyn FieldResolver, value: &V) -> Vec<Cond> {
    let mut out = Vec::new();
    collect(resolver, &registry_for::<V>().apply(value), &mut out);
    out
}

fn collect(resolver: &dyn FieldResolver, fields: &[FieldCond], out: &mut Vec<Cond>) {
    for field in fields {
        if let FieldValue::Nested(inner) = &field.value {
            collect(resolver, inner, out);
            continue;
        }
        let Some(column) = resolver.resolve(&field.name) else {
            continue;
        };
        if let Some(cond) = dispatch_op(column, &field.op, &field.value) {
            out.push(cond);
        }
    }
}

fn dispatch_op(column: ColumnRef, op: &str, value: &FieldValue) -> Option<Cond> {
    let scalar = |v: &FieldValue| match v {
        FieldValue::One(p) => Some(p.clone()),
        _ => None,
    };
    match op.to_ascii_lowercase().as_str() {
        "eq" => Some(compare(column, "=", scalar(value)?)),
        "ne" | "neq" => Some(compare(column, "!=", scalar(value)?)),
        "gt" => Some(compare(column, ">", scalar(value)?)),
        "gte" => Some(compare(column, ">=", scalar(value)?)),
        "lt" => Some(compare(column, "<", scalar(value)?)),
        "lte" => Some(compare(column, "<=", scalar(value)?)),
        "like" => Some(compare(column, "LIKE", scalar(value)?)),
        "ilike" => Some(compare(column, "ILIKE", scalar(value)?)),
        "in" | "notin" | "not_in" => {
            let negated = !op.eq_ignore_ascii_case("in");
            let values = match value {
                FieldValue::Many(ps) => ps.clone(),
                FieldValue::One(p) => vec![p.clone()],
                _ => return None,
            };
            Some(Cond::in_values(vec![column], values, negated))
        }
        "between" => match value {
            FieldValue::Many(ps) if ps.len() == 2 => Some(Cond::Between {
                column,
                from: ps[0].clone(),
                to: ps[1].clone(),
                negated: false,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn compare(column: ColumnRef, op: &'static str, value: Param) -> Cond {
    Cond::Compare { column, op, value }
}

/// Types with a conventional zero value that filters treat as "not set".
pub trait ZeroValue {
    fn is_zero(&self) -> bool;
}

macro_rules! zero_for_int {
    ($($t:ty),*) => {
        $(impl ZeroValue for $t {
            fn is_zero(&self) -> bool {
                *self == 0
            }
        })*
    };
}

zero_for_int!(i8, i16, i32, i64, u32);

impl ZeroValue for f32 {
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl ZeroValue for f64 {
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl ZeroValue for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl ZeroValue for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> ZeroValue for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> ZeroValue for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl ZeroValue for uuid::Uuid {
    fn is_zero(&self) -> bool {
        self.is_nil()
    }
}

impl ZeroValue for serde_json::Value {
    fn is_zero(&self) -> bool {
        self.is_null()
    }
}

// Timestamps have no meaningful zero; a populated field always filters.
impl<Tz: chrono::TimeZone> ZeroValue for chrono::DateTime<Tz> {
    fn is_zero(&self) -> bool {
        false
    }
}

impl ZeroValue for chrono::NaiveDateTime {
    fn is_zero(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamList;

    #[derive(Default)]
    struct AddressFilter {
        city: String,
    }

    impl Filterable for AddressFilter {
        fn registry() -> CondRegistry<Self> {
            CondRegistry::new().field("city", "eq", |f: &Self| FieldValue::scalar(&f.city))
        }
    }

    #[derive(Default)]
    struct UserFilter {
        age: i32,
        name: String,
        ids: Vec<i64>,
        address: Option<AddressFilter>,
    }

    impl Filterable for UserFilter {
        fn registry() -> CondRegistry<Self> {
            CondRegistry::new()
                .field("age", "gt", |f: &Self| FieldValue::scalar(&f.age))
                .renamed("name", "user_name", "like", |f: &Self| {
                    FieldValue::scalar(&f.name)
                })
                .field("ids", "in", |f: &Self| FieldValue::list(&f.ids))
                .field("address", "eq", |f: &Self| FieldValue::nested(&f.address))
        }
    }

    fn render_all(conds: &[Cond]) -> (String, usize) {
        let mut params = ParamList::new();
        let sql = Cond::and(conds.to_vec()).render(&mut params);
        (sql, params.len())
    }

    #[test]
    fn zero_fields_are_skipped() {
        let resolver = TableResolver::new("users");
        let conds = derive_conditions(&resolver, &UserFilter::default());
        assert!(conds.is_empty());
    }

    #[test]
    fn set_fields_become_conditions() {
        let resolver = TableResolver::new("users");
        let filter = UserFilter {
            age: 25,
            name: "al%".into(),
            ..Default::default()
        };
        let conds = derive_conditions(&resolver, &filter);
        let (sql, n) = render_all(&conds);
        assert_eq!(sql, "users.age > $1 AND users.user_name LIKE $2");
        assert_eq!(n, 2);
    }

    #[test]
    fn list_field_derives_in() {
        let resolver = TableResolver::new("users");
        let filter = UserFilter {
            ids: vec![1, 2],
            ..Default::default()
        };
        let conds = derive_conditions(&resolver, &filter);
        let (sql, _) = render_all(&conds);
        assert_eq!(sql, "users.ids IN ($1, $2)");
    }

    #[test]
    fn nested_filter_flattens_when_set() {
        let resolver = TableResolver::new("users");
        let filter = UserFilter {
            address: Some(AddressFilter {
                city: "berlin".into(),
            }),
            ..Default::default()
        };
        let conds = derive_conditions(&resolver, &filter);
        let (sql, _) = render_all(&conds);
        assert_eq!(sql, "users.city = $1");
    }

    #[test]
    fn nested_none_contributes_nothing() {
        let resolver = TableResolver::new("users");
        let filter = UserFilter {
            address: None,
            ..Default::default()
        };
        assert!(derive_conditions(&resolver, &filter).is_empty());
    }

    #[test]
    fn unknown_field_name_is_skipped() {
        let resolver: HashMap<String, ColumnRef> = HashMap::new();
        let filter = UserFilter {
            age: 1,
            ..Default::default()
        };
        assert!(derive_conditions(&resolver, &filter).is_empty());
    }

    #[test]
    fn unknown_op_is_skipped() {
        assert!(
            dispatch_op(
                ColumnRef::bare("a"),
                "soundex",
                &FieldValue::One(Param::new(1i32))
            )
            .is_none()
        );
    }

    #[test]
    fn arity_mismatch_is_skipped() {
        assert!(
            dispatch_op(
                ColumnRef::bare("a"),
                "between",
                &FieldValue::One(Param::new(1i32))
            )
            .is_none()
        );
    }

    #[test]
    fn registry_cache_returns_same_instance() {
        let a: *const CondRegistry<UserFilter> = registry_for::<UserFilter>();
        let b: *const CondRegistry<UserFilter> = registry_for::<UserFilter>();
        assert_eq!(a, b);
    }

    #[test]
    fn optional_some_zero_is_set() {
        assert!(matches!(
            FieldValue::optional(&Some(0i32)),
            FieldValue::One(_)
        ));
        assert!(matches!(
            FieldValue::optional(&Option::<i32>::None),
            FieldValue::Unset
        ));
    }
}
