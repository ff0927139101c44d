//! `kiroku://` link model. Entry bodies may reference other entries or
//! assets with scheme URIs; those are canonicalized on write and the
//! entry-targeting ones are captured on the entry's meta record.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// Rewrites every `kiroku://` URI in the text into its canonical form.
pub fn normalize_links(content: &str) -> String {
    let re = Regex::new(r"kiroku://[^\s)]+").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        normalize_link(caps.get(0).map(|m| m.as_str()).unwrap_or(""))
    })
    .to_string()
}

/// Canonical form is `kiroku://<kind>/<id>` with singular kind names.
/// `kiroku://entries/x`, `kiroku://entry?id=x` and the asset variants all
/// collapse onto it; anything unparseable is left untouched.
fn normalize_link(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let host = url.host_str().unwrap_or("").to_lowercase();
    let kind = match host.as_str() {
        "entries" | "entry" => "entry",
        "assets" | "asset" => "asset",
        other => other,
    };
    let mut target = url.path().trim_start_matches('/').to_string();
    if target.is_empty() {
        for (key, value) in url.query_pairs() {
            if key.eq_ignore_ascii_case("id") && !value.is_empty() {
                target = value.to_string();
                break;
            }
        }
    }
    if target.is_empty() || kind.is_empty() {
        return raw.to_string();
    }
    format!("kiroku://{}/{}", kind, target)
}

/// Collects entry-to-entry links from already-normalized markdown, in
/// order of first appearance, one link per distinct target.
pub fn extract_links(source_id: &str, markdown: &str) -> Vec<Link> {
    let re = Regex::new(r"kiroku://entry/([A-Za-z0-9_-]+)").unwrap();
    let mut links: Vec<Link> = Vec::new();
    for caps in re.captures_iter(markdown) {
        let target = caps.get(1).unwrap().as_str();
        if target == source_id || links.iter().any(|l| l.target == target) {
            continue;
        }
        links.push(Link {
            id: Uuid::new_v4().to_string(),
            source: source_id.to_string(),
            target: target.to_string(),
            kind: "entry".to_string(),
        });
    }
    links
}
