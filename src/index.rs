//! Indexer: projects every entry into a structured, schema-validated index
//! record, plus an inverted keyword index and aggregate stats. Everything
//! here is derived from entries and forms and can always be rebuilt; the
//! index is never the source of truth.
//!
//! Cache files live under `{ws_path}/index/` and are replaced via a temp
//! path and rename, so a concurrent reader observes either the old or the
//! new file, never a partial one.

use crate::entry::{self, EntryView};
use crate::error::is_not_found;
use crate::form;
use crate::link::Link;
use crate::markdown;
use anyhow::Result;
use opendal::Operator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Property values are a closed union so the query engine's equality and
/// membership checks stay total. Scalars render to text; YAML lists keep
/// their element shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub code: String,
    pub field: String,
    pub message: String,
}

/// Derived, rebuildable projection of one entry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub validation_warnings: Vec<ValidationWarning>,
}

fn index_path(ws_path: &str) -> String {
    format!("{}/index/index.json", ws_path)
}

fn inverted_path(ws_path: &str) -> String {
    format!("{}/index/inverted_index.json", ws_path)
}

fn stats_path(ws_path: &str) -> String {
    format!("{}/index/stats.json", ws_path)
}

/// Full rebuild: walks every non-deleted entry, re-derives its record and
/// rewrites the three cache files. Safe to invoke repeatedly; a corrupt
/// entry is skipped with a warning and never aborts the walk.
pub async fn run_once(op: &Operator, ws_path: &str) -> Result<BTreeMap<String, IndexRecord>> {
    let forms = load_form_map(op, ws_path).await?;

    let mut records = BTreeMap::new();
    for entry_id in entry::list_entry_ids(op, ws_path).await? {
        match entry::get_entry(op, ws_path, &entry_id).await {
            Ok(view) => {
                records.insert(entry_id.clone(), build_record(&view, &forms));
            }
            Err(err) if is_not_found(&err) => {}
            Err(err) => {
                tracing::warn!(entry_id = %entry_id, error = %err, "skipping unreadable entry during indexing");
            }
        }
    }

    write_index_files(op, ws_path, &records).await?;
    Ok(records)
}

/// Incremental variant: patches one entry's record into the cached index
/// instead of rescanning the workspace. Converges to the state `run_once`
/// would produce for that entry; a missing or unreadable cache falls back
/// to the full rebuild.
pub async fn update_entry_index(op: &Operator, ws_path: &str, entry_id: &str) -> Result<()> {
    let path = index_path(ws_path);
    if !op.exists(&path).await? {
        run_once(op, ws_path).await?;
        return Ok(());
    }

    let bytes = op.read(&path).await?;
    let mut records: BTreeMap<String, IndexRecord> = match serde_json::from_slice(&bytes.to_vec())
    {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(error = %err, "index cache unreadable, rebuilding");
            run_once(op, ws_path).await?;
            return Ok(());
        }
    };

    let forms = load_form_map(op, ws_path).await?;
    match entry::get_entry(op, ws_path, entry_id).await {
        Ok(view) => {
            records.insert(entry_id.to_string(), build_record(&view, &forms));
        }
        Err(err) if is_not_found(&err) => {
            records.remove(entry_id);
        }
        Err(err) => {
            tracing::warn!(entry_id = %entry_id, error = %err, "dropping unreadable entry from index");
            records.remove(entry_id);
        }
    }

    write_index_files(op, ws_path, &records).await
}

/// Loads the structured index, rebuilding the cache when it is absent or
/// unreadable.
pub(crate) async fn load_index(
    op: &Operator,
    ws_path: &str,
) -> Result<BTreeMap<String, IndexRecord>> {
    let path = index_path(ws_path);
    if !op.exists(&path).await? {
        return run_once(op, ws_path).await;
    }
    let bytes = op.read(&path).await?;
    match serde_json::from_slice(&bytes.to_vec()) {
        Ok(records) => Ok(records),
        Err(err) => {
            tracing::warn!(error = %err, "index cache unreadable, rebuilding");
            run_once(op, ws_path).await
        }
    }
}

/// Keyword lookup against the inverted index. Returns matching entry ids,
/// sorted; an unknown token yields an empty list.
pub async fn search_keyword(op: &Operator, ws_path: &str, keyword: &str) -> Result<Vec<String>> {
    let path = inverted_path(ws_path);
    let inverted: BTreeMap<String, Vec<String>> = if op.exists(&path).await? {
        let bytes = op.read(&path).await?;
        serde_json::from_slice(&bytes.to_vec()).unwrap_or_default()
    } else {
        let records = run_once(op, ws_path).await?;
        build_inverted(&records)
    };

    Ok(inverted
        .get(&keyword.trim().to_lowercase())
        .cloned()
        .unwrap_or_default())
}

pub(crate) fn build_record(view: &EntryView, forms: &HashMap<String, Value>) -> IndexRecord {
    let raw_properties = markdown::extract_properties(&view.content.markdown);
    let mut properties = BTreeMap::new();
    if let Some(obj) = raw_properties.as_object() {
        for (key, value) in obj {
            if let Some(coerced) = coerce_property(value) {
                properties.insert(key.clone(), coerced);
            }
        }
    }

    let validation_warnings = match view.meta.form.as_deref().and_then(|name| forms.get(name)) {
        Some(form_def) => validate_required_fields(&properties, form_def),
        None => Vec::new(),
    };

    IndexRecord {
        id: view.meta.id.clone(),
        title: view.meta.title.clone(),
        form: view.meta.form.clone(),
        properties,
        tags: view.meta.tags.clone(),
        links: view.meta.links.clone(),
        word_count: markdown::compute_word_count(&view.content.markdown),
        checksum: view.meta.integrity.checksum.clone(),
        validation_warnings,
    }
}

fn coerce_property(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(PropertyValue::Text(s.clone())),
        Value::Bool(b) => Some(PropertyValue::Text(b.to_string())),
        Value::Number(n) => Some(PropertyValue::Text(n.to_string())),
        Value::Array(items) => Some(PropertyValue::List(
            items.iter().map(render_scalar).collect(),
        )),
        Value::Object(_) => serde_json::to_string(value).ok().map(PropertyValue::Text),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// `missing_field` warnings for required fields that are absent or blank.
/// Warnings attach to the record; they never abort indexing.
fn validate_required_fields(
    properties: &BTreeMap<String, PropertyValue>,
    form_def: &Value,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let Some(fields) = form_def.get("fields").and_then(|v| v.as_object()) else {
        return warnings;
    };

    for (name, def) in fields {
        let required = def.get("required").and_then(|v| v.as_bool()).unwrap_or(false);
        if !required {
            continue;
        }
        let blank = match properties.get(name) {
            None => true,
            Some(PropertyValue::Text(text)) => text.trim().is_empty(),
            Some(PropertyValue::List(items)) => items.is_empty(),
        };
        if blank {
            warnings.push(ValidationWarning {
                code: "missing_field".to_string(),
                field: name.clone(),
                message: format!("Missing required field: {}", name),
            });
        }
    }
    warnings
}

/// Lowercased `\w+` runs longer than one character that are not purely
/// numeric.
pub fn tokenize(text: &str) -> Vec<String> {
    let re = Regex::new(r"\w+").unwrap();
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|token| token.chars().count() > 1 && !token.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

fn build_inverted(records: &BTreeMap<String, IndexRecord>) -> BTreeMap<String, Vec<String>> {
    let mut inverted: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for record in records.values() {
        let mut sources: Vec<String> = vec![record.title.clone()];
        sources.extend(record.tags.iter().cloned());
        if let Some(form) = &record.form {
            sources.push(form.clone());
        }
        for (key, value) in &record.properties {
            sources.push(key.clone());
            match value {
                PropertyValue::Text(text) => sources.push(text.clone()),
                PropertyValue::List(items) => sources.extend(items.iter().cloned()),
            }
        }

        for source in sources {
            for token in tokenize(&source) {
                inverted.entry(token).or_default().insert(record.id.clone());
            }
        }
    }

    inverted
        .into_iter()
        .map(|(token, ids)| (token, ids.into_iter().collect()))
        .collect()
}

fn build_stats(records: &BTreeMap<String, IndexRecord>) -> Value {
    let mut form_stats: BTreeMap<String, (u64, BTreeMap<String, u64>)> = BTreeMap::new();
    let mut tag_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut uncategorized = 0u64;

    for record in records.values() {
        match &record.form {
            Some(form_name) => {
                let bucket = form_stats.entry(form_name.clone()).or_default();
                bucket.0 += 1;
                for key in record.properties.keys() {
                    *bucket.1.entry(key.clone()).or_insert(0) += 1;
                }
            }
            None => uncategorized += 1,
        }
        for tag in &record.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    let mut form_stats_json = Map::new();
    for (name, (count, fields)) in form_stats {
        form_stats_json.insert(
            name,
            serde_json::json!({ "count": count, "fields": fields }),
        );
    }
    form_stats_json.insert(
        "_uncategorized".to_string(),
        serde_json::json!({ "count": uncategorized }),
    );

    serde_json::json!({
        "entry_count": records.len(),
        "form_stats": form_stats_json,
        "tag_counts": tag_counts,
        "last_indexed": entry::now_ts(),
    })
}

async fn load_form_map(op: &Operator, ws_path: &str) -> Result<HashMap<String, Value>> {
    let mut forms = HashMap::new();
    for def in form::list_forms(op, ws_path).await? {
        if let Some(name) = def.get("name").and_then(|v| v.as_str()) {
            forms.insert(name.to_string(), def.clone());
        }
    }
    Ok(forms)
}

async fn write_index_files(
    op: &Operator,
    ws_path: &str,
    records: &BTreeMap<String, IndexRecord>,
) -> Result<()> {
    op.create_dir(&format!("{}/index/", ws_path)).await?;
    write_json_atomic(op, &index_path(ws_path), records).await?;
    write_json_atomic(op, &inverted_path(ws_path), &build_inverted(records)).await?;
    write_json_atomic(op, &stats_path(ws_path), &build_stats(records)).await?;
    Ok(())
}

/// Replaces a cache file through a temp path and rename where the backend
/// supports it, so readers never observe a partially written file.
async fn write_json_atomic<T: Serialize>(op: &Operator, path: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if op.info().full_capability().rename {
        let tmp = format!("{}.tmp", path);
        op.write(&tmp, bytes).await?;
        op.rename(&tmp, path).await?;
    } else {
        op.write(path, bytes).await?;
    }
    Ok(())
}
