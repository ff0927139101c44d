use crate::workspace;
use anyhow::Result;
use hmac::{Hmac, Mac};
use opendal::Operator;
use sha2::{Digest, Sha256};

/// Checksum and keyed signature for a content blob. Constructed once per
/// workspace and passed by reference; no process-global key cache.
pub trait IntegrityProvider {
    fn checksum(&self, content: &str) -> String;
    fn signature(&self, content: &str) -> String;
}

/// Deterministic stand-in for tests that must not depend on key material.
pub struct FakeIntegrityProvider;

impl IntegrityProvider for FakeIntegrityProvider {
    fn checksum(&self, content: &str) -> String {
        format!("fake-checksum-{}", content.len())
    }
    fn signature(&self, content: &str) -> String {
        format!("fake-signature-{}", content.len())
    }
}

/// SHA-256 checksum, HMAC-SHA256 signature keyed by workspace secret.
pub struct HmacIntegrityProvider {
    secret: Vec<u8>,
}

impl HmacIntegrityProvider {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Loads the workspace key material once. The secret is generated and
    /// persisted when the workspace is scaffolded; a read path never mints
    /// keys.
    pub async fn from_workspace(op: &Operator, ws_path: &str) -> Result<Self> {
        let (_key_id, secret) = workspace::load_hmac_material(op, ws_path).await?;
        Ok(Self::new(secret))
    }
}

impl IntegrityProvider for HmacIntegrityProvider {
    fn checksum(&self, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn signature(&self, content: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(content.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
