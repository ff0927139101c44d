use kiroku_core::markdown;

#[test]
fn test_extract_properties_is_deterministic() {
    let input = "---\nform: Note\ntags:\n  - alpha\n---\n# Title\n\n## Body\nSome text\n\n## Status\nOpen";
    let first = markdown::extract_properties(input);
    let second = markdown::extract_properties(input);
    assert_eq!(first, second);

    let props = first.as_object().unwrap();
    assert_eq!(props.get("Body").unwrap().as_str().unwrap(), "Some text");
    assert_eq!(props.get("Status").unwrap().as_str().unwrap(), "Open");
    assert_eq!(props.get("form").unwrap().as_str().unwrap(), "Note");
}

#[test]
fn test_section_overrides_frontmatter_key() {
    let input = "---\ntitle: A\n---\n## title\nB";
    let props = markdown::extract_properties(input);
    assert_eq!(
        props.as_object().unwrap().get("title").unwrap().as_str(),
        Some("B")
    );
}

#[test]
fn test_empty_section_keeps_frontmatter_default() {
    let input = "---\ntitle: A\n---\n## title\n";
    let props = markdown::extract_properties(input);
    assert_eq!(
        props.as_object().unwrap().get("title").unwrap().as_str(),
        Some("A")
    );
}

#[test]
fn test_h1_closes_open_section_without_becoming_property() {
    let input = "## Summary\nline one\n# Interlude\nstray text\n## Next\nvalue";
    let props = markdown::extract_properties(input);
    let props = props.as_object().unwrap();
    assert_eq!(props.get("Summary").unwrap().as_str(), Some("line one"));
    assert_eq!(props.get("Next").unwrap().as_str(), Some("value"));
    assert!(!props.contains_key("Interlude"));
    // Text after the H1 belongs to no section.
    assert!(!props.values().any(|v| v.as_str() == Some("stray text")));
}

#[test]
fn test_malformed_frontmatter_is_swallowed() {
    let input = "---\n: : not yaml [\n---\n# Title\n\n## Body\ntext";
    let props = markdown::extract_properties(input);
    let props = props.as_object().unwrap();
    assert_eq!(props.get("Body").unwrap().as_str(), Some("text"));
}

#[test]
fn test_missing_frontmatter_yields_empty_map() {
    let (frontmatter, sections) = markdown::parse("# Just a title\n\n## Body\ntext");
    assert!(frontmatter.as_object().unwrap().is_empty());
    assert_eq!(
        sections.as_object().unwrap().get("Body").unwrap().as_str(),
        Some("text")
    );
}

#[test]
fn test_extract_title_first_h1_or_fallback() {
    assert_eq!(
        markdown::extract_title("para\n# First\n# Second", "fb"),
        "First"
    );
    assert_eq!(markdown::extract_title("## only a section", "fb"), "fb");
}

#[test]
fn test_word_count_includes_punctuation_tokens() {
    assert_eq!(markdown::compute_word_count("# Title word"), 3);
    assert_eq!(markdown::compute_word_count(""), 0);
}
