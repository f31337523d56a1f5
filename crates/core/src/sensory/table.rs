//! Compact tabular rendering of a reading batch under a character budget.
//!
//! One pipe-delimited header (the lexically sorted union of flattened field keys)
//! followed by one row per reading. Overflow is resolved by removing the middle row
//! repeatedly, so the earliest and latest readings always survive.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Fields, Reading};

/// Rendered text for an empty batch.
pub const NO_DATA: &str = "(no data)";

/// Rows never culled below this count.
const MIN_ROWS: usize = 2;

/// Render `batch` as a pipe table of at most `max_chars` characters,
/// unless culling has already reached the two-row floor.
pub fn format_batch(batch: &[Reading], max_chars: usize) -> String {
    if batch.is_empty() {
        return NO_DATA.to_owned();
    }

    let flat: Vec<BTreeMap<String, String>> =
        batch.iter().map(|r| flatten(&r.fields)).collect();

    let keys: BTreeSet<&str> = flat
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let header = keys.iter().copied().collect::<Vec<_>>().join("|");

    let rows: Vec<String> = flat
        .iter()
        .map(|row| {
            keys.iter()
                .map(|k| row.get(*k).map(String::as_str).unwrap_or(""))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();

    let rows = cull_rows(&header, rows, max_chars);
    render(&header, &rows)
}

/// Drop the middle row until the table fits or only the bookends remain.
fn cull_rows(header: &str, mut rows: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut total = table_len(header, &rows);
    while total > max_chars && rows.len() > MIN_ROWS {
        let removed = rows.remove(rows.len() / 2);
        total -= removed.chars().count() + 1;
    }
    if total > max_chars {
        tracing::debug!(total, max_chars, rows = rows.len(), "table still over budget at row floor");
    }
    rows
}

fn table_len(header: &str, rows: &[String]) -> usize {
    header.chars().count() + rows.iter().map(|r| r.chars().count() + 1).sum::<usize>()
}

fn render(header: &str, rows: &[String]) -> String {
    let mut out = String::with_capacity(table_len(header, rows));
    out.push_str(header);
    for row in rows {
        out.push('\n');
        out.push_str(row);
    }
    out
}

/// Flatten nested objects into dotted keys: `{"a": {"b": 1}}` becomes `a.b`.
pub fn flatten(fields: &Fields) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (k, v) in fields {
        flatten_into(&mut out, k, v);
    }
    out
}

fn flatten_into(out: &mut BTreeMap<String, String>, key: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(out, &format!("{key}.{k}"), v);
            }
        }
        other => {
            out.insert(key.to_owned(), cell(other));
        }
    }
}

fn cell(value: &Value) -> String {
    let raw = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    raw.replace(['|', '\n', '\r'], " ").trim().to_owned()
}
