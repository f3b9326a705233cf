//! Plain-text tables for device status output

use serde_json::{Map, Value};

fn cell(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Tabulate a list of records, one row per record.
///
/// `keys` selects and orders the columns; by default the keys of the first
/// record are used.
pub fn records_to_table(records: &[Map<String, Value>], keys: Option<&[&str]>) -> String {
    let keys: Vec<String> = match keys {
        Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
        None => match records.first() {
            Some(first) => first.keys().cloned().collect(),
            None => return String::new(),
        },
    };

    let widths: Vec<usize> = keys
        .iter()
        .map(|key| {
            records
                .iter()
                .map(|r| cell(r, key).chars().count())
                .chain(std::iter::once(key.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let sep_len = widths.iter().sum::<usize>() + 2 * keys.len().saturating_sub(1);
    let separator = format!("{}\n", "-".repeat(sep_len));
    let row = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .into_iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{:<w$}", c, w = w))
            .collect();
        format!("{}\n", padded.join("  "))
    };

    let mut out = separator.clone();
    out.push_str(&row(keys.iter().map(|k| capitalize(k)).collect()));
    out.push_str(&separator);
    for record in records {
        out.push_str(&row(keys.iter().map(|k| cell(record, k)).collect()));
    }
    out.push_str(&separator);
    out
}

/// Tabulate a single record as `key: value` lines
pub fn record_to_table(record: &Map<String, Value>) -> String {
    let key_width = record.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    let value_width = record
        .keys()
        .map(|k| cell(record, k).chars().count())
        .max()
        .unwrap_or(0);
    let separator = format!("{}\n", "-".repeat(key_width + 2 + value_width));

    let mut out = separator.clone();
    for key in record.keys() {
        out.push_str(&format!(
            "{:<kw$}: {:<vw$}\n",
            key,
            cell(record, key),
            kw = key_width,
            vw = value_width
        ));
    }
    out.push_str(&separator);
    out
}

/// Render a status value: lists of records as a table, single records as
/// key/value lines, anything else as pretty JSON
pub fn value_to_table(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let records: Option<Vec<Map<String, Value>>> = items
                .iter()
                .map(|item| item.as_object().cloned())
                .collect();
            match records {
                Some(records) => records_to_table(&records, None),
                None => serde_json::to_string_pretty(value).unwrap_or_default(),
            }
        }
        Value::Object(record) => record_to_table(record),
        other => format!("{}\n", other),
    }
}
