//! Form (schema) registry and migration engine. Definitions live as JSON at
//! `{ws_path}/forms/{name}.json`. Upserting a definition never touches
//! entries; only an explicit migration rewrites bodies, and it does so as a
//! batch client of the entry store.

use crate::entry;
use crate::error::{is_revision_conflict, validate_identifier, CoreError};
use crate::integrity::IntegrityProvider;
use crate::markdown;
use anyhow::{anyhow, Result};
use futures::TryStreamExt;
use opendal::{EntryMode, Operator};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const MIGRATION_AUTHOR: &str = "system-migration";

/// Validates and writes a form definition, overwriting any previous
/// version. Existing entries are left untouched.
pub async fn upsert_form(op: &Operator, ws_path: &str, form_def: &Value) -> Result<Value> {
    let normalized = normalize_form_definition(form_def)?;
    let name = normalized["name"].as_str().unwrap_or_default().to_string();

    op.create_dir(&format!("{}/forms/", ws_path)).await?;
    op.write(
        &format!("{}/forms/{}.json", ws_path, name),
        serde_json::to_vec_pretty(&normalized)?,
    )
    .await?;
    Ok(normalized)
}

pub async fn get_form(op: &Operator, ws_path: &str, form_name: &str) -> Result<Value> {
    validate_identifier("form", form_name)?;
    let path = format!("{}/forms/{}.json", ws_path, form_name);
    if !op.exists(&path).await? {
        return Err(anyhow!(CoreError::NotFound(format!("form {}", form_name))));
    }
    let bytes = op.read(&path).await?;
    let def: Value = serde_json::from_slice(&bytes.to_vec())
        .map_err(|e| anyhow!(CoreError::CorruptRecord(format!("form {}: {}", form_name, e))))?;
    Ok(def)
}

pub async fn list_forms(op: &Operator, ws_path: &str) -> Result<Vec<Value>> {
    let mut forms = Vec::new();
    for form_name in list_form_names(op, ws_path).await? {
        match get_form(op, ws_path, &form_name).await {
            Ok(def) => forms.push(def),
            Err(err) => {
                tracing::warn!(form = %form_name, error = %err, "skipping unreadable form");
            }
        }
    }
    Ok(forms)
}

pub(crate) async fn list_form_names(op: &Operator, ws_path: &str) -> Result<Vec<String>> {
    let forms_path = format!("{}/forms/", ws_path);
    if !op.exists(&forms_path).await? {
        return Ok(Vec::new());
    }

    let mut lister = op.lister(&forms_path).await?;
    let mut names = Vec::new();
    while let Some(item) = lister.try_next().await? {
        if item.metadata().mode() != EntryMode::FILE {
            continue;
        }
        let name = item.name().rsplit('/').next().unwrap_or(item.name());
        if let Some(stem) = name.strip_suffix(".json") {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Rewrites every non-deleted entry of the form according to `strategies`,
/// then returns how many entries changed.
///
/// A strategy of `null` drops the `## field` section and its body; a string
/// appends `## field\n<value>` only when the section is absent. Migration
/// fills gaps, it never overwrites populated fields. Each write is a blind
/// compare-and-swap on the revision observed during enumeration; a
/// per-entry conflict is skipped and logged so the batch stays retryable.
pub async fn migrate_form<I: IntegrityProvider>(
    op: &Operator,
    ws_path: &str,
    form_def: &Value,
    strategies: &Map<String, Value>,
    integrity: &I,
) -> Result<usize> {
    let normalized = upsert_form(op, ws_path, form_def).await?;
    let form_name = normalized["name"].as_str().unwrap_or_default().to_string();

    let mut updated_count = 0;
    for summary in entry::list_entries(op, ws_path).await? {
        let content = match entry::get_entry_content(op, ws_path, &summary.id).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(entry_id = %summary.id, error = %err, "skipping unreadable entry during migration");
                continue;
            }
        };

        let properties = markdown::extract_properties(&content.markdown);
        let entry_form = properties
            .get("form")
            .or_else(|| properties.get("class"))
            .and_then(|v| v.as_str());
        if entry_form != Some(form_name.as_str()) {
            continue;
        }

        let rewritten = apply_migration(&content.markdown, strategies);
        if rewritten == content.markdown {
            continue;
        }

        match entry::update_entry(
            op,
            ws_path,
            &summary.id,
            &rewritten,
            &content.revision_id,
            MIGRATION_AUTHOR,
            integrity,
        )
        .await
        {
            Ok(_) => updated_count += 1,
            Err(err) if is_revision_conflict(&err) => {
                tracing::warn!(entry_id = %summary.id, "concurrent edit during migration, entry skipped");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(updated_count)
}

/// Applies field strategies to one markdown body. Pure; shared by the
/// migration engine and its tests.
pub(crate) fn apply_migration(markdown_text: &str, strategies: &Map<String, Value>) -> String {
    let header_re = Regex::new(r"^##\s+(.+)$").unwrap();

    struct Section {
        title: String,
        body: String,
    }

    let mut preamble = String::new();
    let mut sections: Vec<Section> = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in markdown_text.lines() {
        if let Some(caps) = header_re.captures(line) {
            let title = caps.get(1).unwrap().as_str().trim().to_string();
            match current.take() {
                Some(open) => sections.push(Section {
                    title: open,
                    body: buffer.join("\n"),
                }),
                None => preamble = buffer.join("\n"),
            }
            buffer.clear();
            current = Some(title);
            continue;
        }
        buffer.push(line.to_string());
    }
    match current {
        Some(open) => sections.push(Section {
            title: open,
            body: buffer.join("\n"),
        }),
        None => preamble = buffer.join("\n"),
    }

    let existing: HashSet<String> = sections.iter().map(|s| s.title.clone()).collect();

    // Null strategy drops the section; string strategy appends it when absent.
    let mut kept: Vec<Section> = sections
        .into_iter()
        .filter(|sec| !matches!(strategies.get(&sec.title), Some(Value::Null)))
        .collect();
    for (field, strategy) in strategies {
        if let Value::String(default_value) = strategy {
            if !existing.contains(field) {
                kept.push(Section {
                    title: field.clone(),
                    body: default_value.clone(),
                });
            }
        }
    }

    let mut result = preamble;
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    for sec in kept {
        if !result.is_empty() && !result.ends_with("\n\n") {
            if result.ends_with('\n') {
                result.push('\n');
            } else {
                result.push_str("\n\n");
            }
        }
        result.push_str(&format!("## {}\n", sec.title));
        if !sec.body.is_empty() {
            result.push_str(&sec.body);
            result.push('\n');
        }
    }

    // Cosmetic normalization: runs of blank lines collapse to one.
    let re_newlines = Regex::new(r"\n{3,}").unwrap();
    let normalized = re_newlines.replace_all(&result, "\n\n");
    normalized.trim_end().to_string()
}

fn normalize_form_definition(form_def: &Value) -> Result<Value> {
    let name = form_def
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            anyhow!(CoreError::Validation(
                "Form definition missing 'name' field".to_string()
            ))
        })?;
    validate_identifier("form", name)?;

    let version = form_def
        .get("version")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    let fields = normalize_form_fields(form_def.get("fields"));
    let template = match form_def.get("template").and_then(|v| v.as_str()) {
        Some(template) => template.to_string(),
        None => template_from_fields(name, &fields),
    };

    Ok(serde_json::json!({
        "name": name,
        "version": version,
        "template": template,
        "fields": fields,
    }))
}

/// Field lists may arrive as a map or as an array of `{name, ...}` items;
/// both normalize to the map shape.
fn normalize_form_fields(fields: Option<&Value>) -> Value {
    let mut normalized = Map::new();
    match fields {
        Some(Value::Object(map)) => {
            for (name, def) in map {
                normalized.insert(name.clone(), def.clone());
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                let mut def = item.clone();
                if let Some(obj) = def.as_object_mut() {
                    obj.remove("name");
                }
                normalized.insert(name.to_string(), def);
            }
        }
        _ => {}
    }
    Value::Object(normalized)
}

fn template_from_fields(form_name: &str, fields: &Value) -> String {
    let mut template = format!("# {}\n\n", form_name);
    if let Some(map) = fields.as_object() {
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        for name in names {
            template.push_str(&format!("## {}\n\n", name));
        }
    }
    template
}
