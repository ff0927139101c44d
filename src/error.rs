use regex::Regex;
use thiserror::Error;

/// Error taxonomy surfaced to callers. Functions return `anyhow::Result`
/// with one of these inside, so an API layer can `downcast_ref` and map
/// each kind to a transport code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Revision conflict on {entry_id}: expected {expected}, found {actual}")]
    RevisionConflict {
        entry_id: String,
        expected: String,
        actual: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CoreError>(), Some(CoreError::NotFound(_)))
}

pub fn is_revision_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CoreError>(),
        Some(CoreError::RevisionConflict { .. })
    )
}

/// Identifiers accepted from callers (entry ids, form names) must match
/// `^[A-Za-z0-9_-]+$`. Checked before any storage access.
pub fn validate_identifier(kind: &str, id: &str) -> Result<(), CoreError> {
    let re = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    if re.is_match(id) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid {} identifier: {:?}",
            kind, id
        )))
    }
}
