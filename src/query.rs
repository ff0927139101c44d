//! Query engine: equality and membership filters over the structured
//! index. Range and comparison operators are out of this engine's scope
//! and raise `NotImplemented` rather than being silently ignored.

use crate::error::CoreError;
use crate::index::{self, IndexRecord, PropertyValue};
use anyhow::{anyhow, Result};
use opendal::Operator;
use serde_json::{Map, Value};

/// Returns every index record matching all filters (logical AND). An empty
/// filter map returns every non-deleted record. The keys `"tag"` and
/// `"tags"` require membership in the record's tags; any other key matches
/// a top-level field when one exists, else the property of that name, with
/// membership for list values and exact equality for text.
pub async fn query_index(
    op: &Operator,
    ws_path: &str,
    filters: &Map<String, Value>,
) -> Result<Vec<IndexRecord>> {
    let records = index::load_index(op, ws_path).await?;

    let mut results = Vec::new();
    for record in records.values() {
        if matches_filters(record, filters)? {
            results.push(record.clone());
        }
    }
    results.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(results)
}

fn matches_filters(record: &IndexRecord, filters: &Map<String, Value>) -> Result<bool> {
    for (key, expected) in filters {
        if expected.is_object() {
            return Err(anyhow!(CoreError::NotImplemented(format!(
                "structured query operators are not supported (filter key {:?})",
                key
            ))));
        }
        let expected = render_filter_value(expected);

        if key == "tag" || key == "tags" {
            if !record.tags.iter().any(|tag| *tag == expected) {
                return Ok(false);
            }
            continue;
        }

        let top_level = match key.as_str() {
            "id" => Some(record.id.clone()),
            "title" => Some(record.title.clone()),
            "form" => record.form.clone(),
            "checksum" => Some(record.checksum.clone()),
            "word_count" => Some(record.word_count.to_string()),
            _ => None,
        };
        if let Some(actual) = top_level {
            if actual != expected {
                return Ok(false);
            }
            continue;
        }

        match record.properties.get(key) {
            Some(PropertyValue::Text(text)) => {
                if *text != expected {
                    return Ok(false);
                }
            }
            Some(PropertyValue::List(items)) => {
                if !items.iter().any(|item| *item == expected) {
                    return Ok(false);
                }
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn render_filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
