/**
 * Result Row Normalization
 *
 * DESIGN DECISION: One helper converts every query result into a uniform list
 * of column-name-keyed rows, regardless of the shape the underlying engine
 * handed back (positional tuples, dict rows, empty sets).
 * WHY: Without this, each manager (C2/C3) grows its own ad-hoc row-tuple
 * unpacking, which is how result-parsing logic proliferates and drifts out
 * of sync with schema changes. Centralizing it here means a schema change
 * only touches this file.
 *
 * This helper is pure and total: it never panics on a well-formed
 * `rusqlite::Row`, and an empty result set normalizes to an empty `Vec`.
 */
use rusqlite::types::ValueRef;
use rusqlite::{Params, Row as SqlRow, Statement};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A single normalized result row: column name to JSON value.
pub type Row = BTreeMap<String, JsonValue>;

/// Convert one SQLite column value into its JSON equivalent.
///
/// Integers, reals, and text map directly. Blobs are hex-encoded (Sibyl never
/// stores binary values the caller is expected to interpret as text) and NULL
/// becomes `Value::Null`.
pub fn sql_value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(hex::encode(b)),
    }
}

fn row_to_map(row: &SqlRow<'_>, column_names: &[String]) -> rusqlite::Result<Row> {
    let mut map = Row::new();
    for (idx, name) in column_names.iter().enumerate() {
        let value = row.get_ref(idx)?;
        map.insert(name.clone(), sql_value_to_json(value));
    }
    Ok(map)
}

/// Run a prepared statement and normalize every returned row.
///
/// Total over the result set: zero rows yields an empty `Vec`, never an
/// error, mirroring the spec's requirement that normalization is pure.
pub fn normalize_rows<P: Params>(stmt: &mut Statement<'_>, params: P) -> rusqlite::Result<Vec<Row>> {
    let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mapped = stmt.query_map(params, move |row| row_to_map(row, &column_names))?;
    mapped.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_normalize_rows_empty() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id TEXT)", []).unwrap();
        let mut stmt = conn.prepare("SELECT id FROM t").unwrap();
        let rows = normalize_rows(&mut stmt, []).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_normalize_rows_mixed_types() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE t (id TEXT, count INTEGER, score REAL, note TEXT)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t VALUES ('a', 5, 0.5, NULL)",
            [],
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT id, count, score, note FROM t").unwrap();
        let rows = normalize_rows(&mut stmt, []).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], JsonValue::String("a".to_string()));
        assert_eq!(rows[0]["count"], JsonValue::from(5));
        assert_eq!(rows[0]["note"], JsonValue::Null);
    }

    #[test]
    fn test_normalize_rows_idempotent_on_reuse() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id TEXT)", []).unwrap();
        conn.execute("INSERT INTO t VALUES ('x')", []).unwrap();

        let mut stmt = conn.prepare("SELECT id FROM t").unwrap();
        let first = normalize_rows(&mut stmt, []).unwrap();
        let mut stmt2 = conn.prepare("SELECT id FROM t").unwrap();
        let second = normalize_rows(&mut stmt2, []).unwrap();
        assert_eq!(first, second);
    }
}
