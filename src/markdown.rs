//! Structured-text parser: pure extraction of frontmatter and `##` sections
//! from an entry's markdown. The indexer re-derives properties from stored
//! markdown on every rebuild, so everything here must be deterministic.

use regex::Regex;
use serde_json::{Map, Value};

/// Splits a leading `---` delimited YAML block off the markdown. Malformed
/// YAML yields an empty map rather than an error; user-authored content
/// must never make parsing fatal.
pub fn extract_frontmatter(content: &str) -> (Value, String) {
    let re = Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n").unwrap();
    if let Some(caps) = re.captures(content) {
        let yaml_str = caps.get(1).unwrap().as_str();
        let fm_yaml: Option<serde_yaml::Value> = serde_yaml::from_str(yaml_str).ok();
        let fm_json = fm_yaml
            .and_then(|y| serde_json::to_value(y).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()));
        let end = caps.get(0).unwrap().end();
        return (fm_json, content[end..].to_string());
    }
    (Value::Object(Map::new()), content.to_string())
}

/// Scans the body for `## ` headers. Each header opens a named section whose
/// value is the trimmed text up to the next header line. An H1 (or any other
/// `#` header that is not `## `) closes the open section without opening a
/// new one.
pub fn extract_sections(body: &str) -> Vec<(String, String)> {
    let header_re = Regex::new(r"^##\s+(.+)$").unwrap();
    let mut sections = Vec::new();
    let mut current_key: Option<String> = None;
    let mut buffer: Vec<String> = Vec::new();

    let close = |key: Option<String>, buffer: &mut Vec<String>, out: &mut Vec<(String, String)>| {
        if let Some(key) = key {
            out.push((key, buffer.join("\n").trim().to_string()));
        }
        buffer.clear();
    };

    for line in body.lines() {
        if let Some(caps) = header_re.captures(line) {
            close(current_key.take(), &mut buffer, &mut sections);
            current_key = Some(caps.get(1).unwrap().as_str().trim().to_string());
            continue;
        }

        if line.starts_with('#') {
            close(current_key.take(), &mut buffer, &mut sections);
            continue;
        }

        if current_key.is_some() {
            buffer.push(line.to_string());
        }
    }
    close(current_key, &mut buffer, &mut sections);

    sections
}

/// Parses markdown into `(frontmatter, sections)` JSON objects.
pub fn parse(content: &str) -> (Value, Value) {
    let (frontmatter, body) = extract_frontmatter(content);
    let mut sections = Map::new();
    for (key, value) in extract_sections(&body) {
        sections.insert(key, Value::String(value));
    }
    (frontmatter, Value::Object(sections))
}

/// Property map for an entry: frontmatter keys supply defaults and sections
/// override them key-by-key. An empty section body leaves the frontmatter
/// value in place.
pub fn extract_properties(markdown: &str) -> Value {
    let mut properties = Map::new();

    let (frontmatter, body) = extract_frontmatter(markdown);
    if let Some(obj) = frontmatter.as_object() {
        for (k, v) in obj {
            properties.insert(k.clone(), v.clone());
        }
    }

    for (key, value) in extract_sections(&body) {
        if !value.is_empty() {
            properties.insert(key, Value::String(value));
        }
    }

    Value::Object(properties)
}

/// First `# ` heading, or the fallback when the document has none.
pub fn extract_title(content: &str, fallback: &str) -> String {
    for line in content.lines() {
        if let Some(stripped) = line.strip_prefix("# ") {
            return stripped.trim().to_string();
        }
    }
    fallback.to_string()
}

/// Whitespace token count over the raw markdown. Punctuation tokens such as
/// a bare `#` count as words.
pub fn compute_word_count(content: &str) -> usize {
    content.split_whitespace().count()
}
