//! Workspace scaffolding and key-material collaborator. The entry store,
//! registry and indexer only consume the directory layout and the HMAC
//! secret created here; they never mint key material themselves.

use crate::error::CoreError;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use opendal::Operator;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug)]
pub struct WorkspaceMeta {
    pub id: String,
    pub name: String,
    pub created_at: f64,
    #[serde(default)]
    pub hmac_key_id: String,
    #[serde(default)]
    pub hmac_key: String,
    #[serde(default)]
    pub last_rotation: String,
}

pub async fn workspace_exists(op: &Operator, ws_path: &str) -> Result<bool> {
    Ok(op.exists(&format!("{}/meta.json", ws_path)).await?)
}

/// Scaffolds one workspace root: `entries/`, `forms/` and `index/` cache
/// directories plus a meta record carrying a fresh random 32-byte HMAC
/// secret. This is the only place key material is generated.
pub async fn create_workspace(op: &Operator, ws_path: &str, name: &str) -> Result<WorkspaceMeta> {
    if workspace_exists(op, ws_path).await? {
        return Err(anyhow!(CoreError::AlreadyExists(format!(
            "workspace {}",
            ws_path
        ))));
    }

    op.create_dir(&format!("{}/", ws_path)).await?;
    for dir in &["entries", "forms", "index"] {
        op.create_dir(&format!("{}/{}/", ws_path, dir)).await?;
    }

    let mut key_bytes = [0u8; 32];
    rand::rng().fill(&mut key_bytes);

    let meta = WorkspaceMeta {
        id: name.to_string(),
        name: name.to_string(),
        created_at: Utc::now().timestamp_millis() as f64 / 1000.0,
        hmac_key_id: format!("key-{}", Uuid::new_v4().simple()),
        hmac_key: general_purpose::STANDARD.encode(key_bytes),
        last_rotation: Utc::now().to_rfc3339(),
    };
    op.write(
        &format!("{}/meta.json", ws_path),
        serde_json::to_vec_pretty(&meta)?,
    )
    .await?;

    Ok(meta)
}

pub async fn get_workspace(op: &Operator, ws_path: &str) -> Result<WorkspaceMeta> {
    let meta_path = format!("{}/meta.json", ws_path);
    if !op.exists(&meta_path).await? {
        return Err(anyhow!(CoreError::NotFound(format!(
            "workspace {}",
            ws_path
        ))));
    }
    let bytes = op.read(&meta_path).await?;
    let meta: WorkspaceMeta = serde_json::from_slice(&bytes.to_vec())?;
    Ok(meta)
}

/// Reads the workspace HMAC secret. Absent key material is an error here;
/// generation belongs to [`create_workspace`] alone.
pub async fn load_hmac_material(op: &Operator, ws_path: &str) -> Result<(String, Vec<u8>)> {
    let meta = get_workspace(op, ws_path).await?;
    if meta.hmac_key.is_empty() {
        return Err(anyhow!(CoreError::CorruptRecord(format!(
            "workspace {} has no hmac_key",
            ws_path
        ))));
    }
    let secret = general_purpose::STANDARD.decode(&meta.hmac_key)?;
    Ok((meta.hmac_key_id, secret))
}
