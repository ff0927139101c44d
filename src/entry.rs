//! Entry store: CRUD plus an append-only revision history for a single
//! markdown entry. Concurrency control is a pure compare-and-swap on the
//! caller-supplied parent revision id; there are no locks.
//!
//! On-disk layout per entry:
//! `{ws_path}/entries/{id}/{content.json, meta.json, history/index.json,
//! history/{revision_id}.json}`. Writes land in a fixed staging order with
//! `content.json` last, so a crash mid-write leaves a directory that reads
//! treat as missing rather than a half-written entry.

use crate::diff;
use crate::error::{validate_identifier, CoreError};
use crate::index;
use crate::integrity::IntegrityProvider;
use crate::link::{self, Link};
use crate::markdown;
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::TryStreamExt;
use opendal::{EntryMode, Operator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IntegrityPayload {
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub signature: String,
}

/// Current head content of an entry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryContent {
    pub revision_id: String,
    pub parent_revision_id: Option<String>,
    pub author: String,
    pub markdown: String,
    #[serde(default)]
    pub frontmatter: Value,
    #[serde(default)]
    pub sections: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryMeta {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub created_at: f64,
    #[serde(default)]
    pub updated_at: f64,
    #[serde(default)]
    pub integrity: IntegrityPayload,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<f64>,
}

/// Immutable revision record. The full markdown is stored per revision so
/// restore can replay it exactly; the diff is informational.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RevisionRecord {
    pub revision_id: String,
    pub entry_id: String,
    pub parent_revision_id: Option<String>,
    pub timestamp: f64,
    pub author: String,
    pub markdown: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub integrity: IntegrityPayload,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,
}

/// One line of the append-only history index. The tail always matches the
/// entry's current `revision_id`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryRecord {
    pub revision_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct HistoryIndex {
    #[serde(default)]
    revisions: Vec<HistoryRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryHistory {
    pub entry_id: String,
    pub revisions: Vec<HistoryRecord>,
}

/// Projection used by listings and the indexer; built without touching
/// history files.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntrySummary {
    pub id: String,
    pub title: String,
    pub form: Option<String>,
    pub tags: Vec<String>,
    pub revision_id: String,
    pub created_at: f64,
    pub updated_at: f64,
    pub integrity: IntegrityPayload,
}

#[derive(Debug, Clone)]
pub struct EntryView {
    pub meta: EntryMeta,
    pub content: EntryContent,
}

pub(crate) fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn entry_dir(ws_path: &str, entry_id: &str) -> String {
    format!("{}/entries/{}", ws_path, entry_id)
}

async fn read_json<T: serde::de::DeserializeOwned>(
    op: &Operator,
    path: &str,
    what: &str,
) -> Result<T> {
    if !op.exists(path).await? {
        return Err(anyhow!(CoreError::NotFound(what.to_string())));
    }
    let bytes = op.read(path).await?;
    serde_json::from_slice(&bytes.to_vec())
        .map_err(|e| anyhow!(CoreError::CorruptRecord(format!("{}: {}", what, e))))
}

fn frontmatter_tags(frontmatter: &Value) -> Vec<String> {
    match frontmatter.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Value::String(tag)) if !tag.is_empty() => vec![tag.clone()],
        _ => Vec::new(),
    }
}

fn frontmatter_form(frontmatter: &Value) -> Option<String> {
    frontmatter
        .get("form")
        .or_else(|| frontmatter.get("class"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Creates an entry. The entry directory must not exist yet.
pub async fn create_entry<I: IntegrityProvider>(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
    content: &str,
    author: &str,
    integrity: &I,
) -> Result<EntryMeta> {
    validate_identifier("entry", entry_id)?;
    let dir = entry_dir(ws_path, entry_id);

    if op.exists(&format!("{}/meta.json", dir)).await?
        || op.exists(&format!("{}/content.json", dir)).await?
    {
        return Err(anyhow!(CoreError::AlreadyExists(format!(
            "entry {}",
            entry_id
        ))));
    }

    let markdown_text = link::normalize_links(content);
    let (frontmatter, sections) = markdown::parse(&markdown_text);
    let now = now_ts();
    let revision_id = Uuid::new_v4().to_string();
    let payload = IntegrityPayload {
        checksum: integrity.checksum(&markdown_text),
        signature: integrity.signature(&markdown_text),
    };

    let meta = EntryMeta {
        id: entry_id.to_string(),
        title: markdown::extract_title(&markdown_text, entry_id),
        form: frontmatter_form(&frontmatter),
        tags: frontmatter_tags(&frontmatter),
        links: link::extract_links(entry_id, &markdown_text),
        created_at: now,
        updated_at: now,
        integrity: payload.clone(),
        deleted: false,
        deleted_at: None,
    };

    let revision = RevisionRecord {
        revision_id: revision_id.clone(),
        entry_id: entry_id.to_string(),
        parent_revision_id: None,
        timestamp: now,
        author: author.to_string(),
        markdown: markdown_text.clone(),
        diff: diff::unified_diff("", &markdown_text, entry_id),
        integrity: payload.clone(),
        message: "create".to_string(),
        restored_from: None,
    };

    let history = HistoryIndex {
        revisions: vec![HistoryRecord {
            revision_id: revision_id.clone(),
            timestamp: now,
            checksum: payload.checksum.clone(),
            signature: payload.signature.clone(),
        }],
    };

    let entry_content = EntryContent {
        revision_id,
        parent_revision_id: None,
        author: author.to_string(),
        markdown: markdown_text,
        frontmatter,
        sections,
    };

    op.create_dir(&format!("{}/history/", dir)).await?;

    // Staging order: revision record, history index, meta, content last.
    // An entry without content.json reads as missing.
    op.write(
        &format!("{}/history/{}.json", dir, revision.revision_id),
        serde_json::to_vec_pretty(&revision)?,
    )
    .await?;
    op.write(
        &format!("{}/history/index.json", dir),
        serde_json::to_vec_pretty(&history)?,
    )
    .await?;
    op.write(
        &format!("{}/meta.json", dir),
        serde_json::to_vec_pretty(&meta)?,
    )
    .await?;
    op.write(
        &format!("{}/content.json", dir),
        serde_json::to_vec_pretty(&entry_content)?,
    )
    .await?;

    index::update_entry_index(op, ws_path, entry_id).await?;

    Ok(meta)
}

/// Replaces the entry body. Fails with `RevisionConflict` unless
/// `parent_revision_id` names the current head; exactly one concurrent
/// writer wins per observed head, losers must re-read and retry.
pub async fn update_entry<I: IntegrityProvider>(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
    content: &str,
    parent_revision_id: &str,
    author: &str,
    integrity: &I,
) -> Result<EntryMeta> {
    validate_identifier("entry", entry_id)?;

    let meta = read_visible_meta(op, ws_path, entry_id).await?;
    let current = read_content(op, ws_path, entry_id).await?;

    if current.revision_id != parent_revision_id {
        return Err(anyhow!(CoreError::RevisionConflict {
            entry_id: entry_id.to_string(),
            expected: parent_revision_id.to_string(),
            actual: current.revision_id.clone(),
        }));
    }

    let (meta, _revision) = commit_revision(
        op,
        ws_path,
        entry_id,
        meta,
        &current,
        content,
        author,
        "edit".to_string(),
        None,
        integrity,
    )
    .await?;
    Ok(meta)
}

/// Appends a new head revision on top of `current`. Shared by update and
/// restore; callers have already performed their concurrency check.
#[allow(clippy::too_many_arguments)]
async fn commit_revision<I: IntegrityProvider>(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
    mut meta: EntryMeta,
    current: &EntryContent,
    content: &str,
    author: &str,
    message: String,
    restored_from: Option<String>,
    integrity: &I,
) -> Result<(EntryMeta, RevisionRecord)> {
    let dir = entry_dir(ws_path, entry_id);

    let markdown_text = link::normalize_links(content);
    let (frontmatter, sections) = markdown::parse(&markdown_text);
    let now = now_ts();
    let revision_id = Uuid::new_v4().to_string();
    let payload = IntegrityPayload {
        checksum: integrity.checksum(&markdown_text),
        signature: integrity.signature(&markdown_text),
    };

    let revision = RevisionRecord {
        revision_id: revision_id.clone(),
        entry_id: entry_id.to_string(),
        parent_revision_id: Some(current.revision_id.clone()),
        timestamp: now,
        author: author.to_string(),
        markdown: markdown_text.clone(),
        diff: diff::unified_diff(&current.markdown, &markdown_text, entry_id),
        integrity: payload.clone(),
        message,
        restored_from,
    };

    let mut history: HistoryIndex = read_json(
        op,
        &format!("{}/history/index.json", dir),
        &format!("history index for entry {}", entry_id),
    )
    .await?;
    history.revisions.push(HistoryRecord {
        revision_id: revision_id.clone(),
        timestamp: now,
        checksum: payload.checksum.clone(),
        signature: payload.signature.clone(),
    });

    meta.title = markdown::extract_title(&markdown_text, entry_id);
    meta.form = frontmatter_form(&frontmatter);
    meta.tags = frontmatter_tags(&frontmatter);
    meta.links = link::extract_links(entry_id, &markdown_text);
    meta.integrity = payload;
    meta.updated_at = now;

    let entry_content = EntryContent {
        revision_id,
        parent_revision_id: Some(current.revision_id.clone()),
        author: author.to_string(),
        markdown: markdown_text,
        frontmatter,
        sections,
    };

    op.write(
        &format!("{}/history/{}.json", dir, revision.revision_id),
        serde_json::to_vec_pretty(&revision)?,
    )
    .await?;
    op.write(
        &format!("{}/history/index.json", dir),
        serde_json::to_vec_pretty(&history)?,
    )
    .await?;
    op.write(
        &format!("{}/meta.json", dir),
        serde_json::to_vec_pretty(&meta)?,
    )
    .await?;
    op.write(
        &format!("{}/content.json", dir),
        serde_json::to_vec_pretty(&entry_content)?,
    )
    .await?;

    index::update_entry_index(op, ws_path, entry_id).await?;

    Ok((meta, revision))
}

/// Single-entry reads treat a corrupt companion file like a missing one;
/// the parse detail survives in the log only.
async fn read_json_defensive<T: serde::de::DeserializeOwned>(
    op: &Operator,
    path: &str,
    what: &str,
) -> Result<T> {
    match read_json(op, path, what).await {
        Err(err)
            if matches!(
                err.downcast_ref::<CoreError>(),
                Some(CoreError::CorruptRecord(_))
            ) =>
        {
            tracing::warn!(record = %what, error = %err, "corrupt record reads as missing");
            Err(anyhow!(CoreError::NotFound(what.to_string())))
        }
        other => other,
    }
}

async fn read_meta(op: &Operator, ws_path: &str, entry_id: &str) -> Result<EntryMeta> {
    read_json_defensive(
        op,
        &format!("{}/meta.json", entry_dir(ws_path, entry_id)),
        &format!("entry {}", entry_id),
    )
    .await
}

/// Meta with the tombstone applied: soft-deleted entries read as missing.
async fn read_visible_meta(op: &Operator, ws_path: &str, entry_id: &str) -> Result<EntryMeta> {
    let meta = read_meta(op, ws_path, entry_id).await?;
    if meta.deleted {
        return Err(anyhow!(CoreError::NotFound(format!("entry {}", entry_id))));
    }
    Ok(meta)
}

async fn read_content(op: &Operator, ws_path: &str, entry_id: &str) -> Result<EntryContent> {
    read_json_defensive(
        op,
        &format!("{}/content.json", entry_dir(ws_path, entry_id)),
        &format!("entry {}", entry_id),
    )
    .await
}

pub async fn get_entry(op: &Operator, ws_path: &str, entry_id: &str) -> Result<EntryView> {
    validate_identifier("entry", entry_id)?;
    let meta = read_visible_meta(op, ws_path, entry_id).await?;
    let content = read_content(op, ws_path, entry_id).await?;
    Ok(EntryView { meta, content })
}

pub async fn get_entry_content(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
) -> Result<EntryContent> {
    validate_identifier("entry", entry_id)?;
    read_visible_meta(op, ws_path, entry_id).await?;
    read_content(op, ws_path, entry_id).await
}

pub(crate) async fn list_entry_ids(op: &Operator, ws_path: &str) -> Result<Vec<String>> {
    let entries_path = format!("{}/entries/", ws_path);
    if !op.exists(&entries_path).await? {
        return Ok(Vec::new());
    }

    let mut lister = op.lister(&entries_path).await?;
    let mut ids = Vec::new();
    while let Some(item) = lister.try_next().await? {
        if item.path() == entries_path || item.metadata().mode() != EntryMode::DIR {
            continue;
        }
        let name = item.name().trim_end_matches('/');
        let id = name.rsplit('/').next().unwrap_or(name);
        if !id.is_empty() {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Lists non-deleted entries. A corrupt entry is skipped with a warning so
/// one bad record cannot abort a workspace-wide scan.
pub async fn list_entries(op: &Operator, ws_path: &str) -> Result<Vec<EntrySummary>> {
    let mut summaries = Vec::new();
    for entry_id in list_entry_ids(op, ws_path).await? {
        match load_summary(op, ws_path, &entry_id).await {
            Ok(Some(summary)) => summaries.push(summary),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(entry_id = %entry_id, error = %err, "skipping unreadable entry");
            }
        }
    }
    Ok(summaries)
}

async fn load_summary(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
) -> Result<Option<EntrySummary>> {
    let meta = read_meta(op, ws_path, entry_id).await?;
    if meta.deleted {
        return Ok(None);
    }
    let content = read_content(op, ws_path, entry_id).await?;
    Ok(Some(EntrySummary {
        id: meta.id,
        title: meta.title,
        form: meta.form,
        tags: meta.tags,
        revision_id: content.revision_id,
        created_at: meta.created_at,
        updated_at: meta.updated_at,
        integrity: meta.integrity,
    }))
}

/// Soft delete sets the tombstone and keeps every file for audit and
/// restore. Hard delete removes the entry directory and is irreversible.
pub async fn delete_entry(op: &Operator, ws_path: &str, entry_id: &str, hard: bool) -> Result<()> {
    validate_identifier("entry", entry_id)?;
    let dir = entry_dir(ws_path, entry_id);
    if !op.exists(&format!("{}/meta.json", dir)).await? {
        return Err(anyhow!(CoreError::NotFound(format!("entry {}", entry_id))));
    }

    if hard {
        op.remove_all(&format!("{}/", dir)).await?;
    } else {
        let mut meta = read_meta(op, ws_path, entry_id).await?;
        meta.deleted = true;
        meta.deleted_at = Some(now_ts());
        op.write(
            &format!("{}/meta.json", dir),
            serde_json::to_vec_pretty(&meta)?,
        )
        .await?;
    }

    index::update_entry_index(op, ws_path, entry_id).await?;
    Ok(())
}

/// Revision history in creation order. Available for soft-deleted entries;
/// the tombstone hides an entry from reads, not from audit.
pub async fn get_entry_history(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
) -> Result<EntryHistory> {
    validate_identifier("entry", entry_id)?;
    let history: HistoryIndex = read_json_defensive(
        op,
        &format!("{}/history/index.json", entry_dir(ws_path, entry_id)),
        &format!("entry {}", entry_id),
    )
    .await?;
    Ok(EntryHistory {
        entry_id: entry_id.to_string(),
        revisions: history.revisions,
    })
}

pub async fn get_revision(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
    revision_id: &str,
) -> Result<RevisionRecord> {
    validate_identifier("entry", entry_id)?;
    validate_identifier("revision", revision_id)?;
    read_json(
        op,
        &format!(
            "{}/history/{}.json",
            entry_dir(ws_path, entry_id),
            revision_id
        ),
        &format!("revision {} of entry {}", revision_id, entry_id),
    )
    .await
}

/// Replays the markdown stored on a historical revision as a new head
/// revision, recording where it came from. History stays append-only; the
/// target revision itself is never mutated.
pub async fn restore_entry<I: IntegrityProvider>(
    op: &Operator,
    ws_path: &str,
    entry_id: &str,
    revision_id: &str,
    author: &str,
    integrity: &I,
) -> Result<RevisionRecord> {
    let target = get_revision(op, ws_path, entry_id, revision_id).await?;
    let meta = read_visible_meta(op, ws_path, entry_id).await?;
    let current = read_content(op, ws_path, entry_id).await?;

    let (_meta, revision) = commit_revision(
        op,
        ws_path,
        entry_id,
        meta,
        &current,
        &target.markdown,
        author,
        format!("restore from {}", revision_id),
        Some(revision_id.to_string()),
        integrity,
    )
    .await?;
    Ok(revision)
}
