//! Model traits implemented by generated per-table code.

use crate::field::Assign;
use crate::param::Param;
use crate::row::FromRow;

/// A mapped table row type.
///
/// Generated accessor code implements this once per table; everything the
/// builder needs to compile statements for the type is carried here as
/// associated constants.
pub trait Model: FromRow + Default + Send + Sync + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const PRIMARY_KEY: &'static str;

    /// The primary key value of this instance, as a bind parameter.
    fn primary_key_param(&self) -> Param;
}

/// Models that can be written with INSERT.
///
/// Split from [`Model`] so read-only projections (views, aggregate rows) can
/// still be queried.
pub trait InsertRow: Model {
    /// Columns written on insert, usually everything but a serial key.
    fn insert_columns() -> &'static [&'static str];

    /// Values for [`insert_columns`](InsertRow::insert_columns), in order.
    fn insert_params(&self) -> Vec<Param>;
}

/// A source of SET assignments for UPDATE statements.
///
/// Implemented for assignment lists and JSON maps here, and by generated
/// model types for struct-based updates that skip zero-valued fields.
pub trait AssignSource {
    fn assignments(&self) -> Vec<Assign>;
}

impl AssignSource for Vec<Assign> {
    fn assignments(&self) -> Vec<Assign> {
        self.clone()
    }
}

impl AssignSource for serde_json::Map<String, serde_json::Value> {
    fn assignments(&self) -> Vec<Assign> {
        use serde_json::Value;
        self.iter()
            .filter(|(name, _)| crate::ident::is_valid(name))
            .map(|(name, value)| match value {
                Value::Null => Assign::value(name, Option::<String>::None),
                Value::Bool(b) => Assign::value(name, *b),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => Assign::value(name, i),
                    (None, Some(f)) => Assign::value(name, f),
                    (None, None) => Assign::value(name, value.clone()),
                },
                Value::String(s) => Assign::value(name, s.clone()),
                // Arrays and objects bind as jsonb.
                _ => Assign::value(name, value.clone()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_map_produces_one_assignment_per_valid_key() {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), serde_json::json!("alice"));
        map.insert("age".into(), serde_json::json!(30));
        map.insert("bad key".into(), serde_json::json!(1));
        let assigns = map.assignments();
        assert_eq!(assigns.len(), 2);
    }
}
