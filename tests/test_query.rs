mod common;

use common::{setup_operator, setup_workspace};
use kiroku_core::error::CoreError;
use kiroku_core::integrity::FakeIntegrityProvider;
use kiroku_core::{entry, query};
use opendal::Operator;
use serde_json::{json, Map, Value};

async fn seed(op: &Operator, ws_path: &str) -> anyhow::Result<()> {
    let integrity = FakeIntegrityProvider;
    entry::create_entry(
        op,
        ws_path,
        "t1",
        "---\nform: Task\ntags:\n  - urgent\n---\n# T1\n\n## Status\nopen\n\n## Assignees\n",
        "a1",
        &integrity,
    )
    .await?;
    entry::create_entry(
        op,
        ws_path,
        "t2",
        "---\nform: Task\npeople:\n  - ada\n  - grace\n---\n# T2\n\n## Status\ndone",
        "a1",
        &integrity,
    )
    .await?;
    entry::create_entry(
        op,
        ws_path,
        "n1",
        "---\nform: Note\ntags:\n  - urgent\n---\n# N1\n\n## Body\ntext",
        "a1",
        &integrity,
    )
    .await?;
    Ok(())
}

fn filters(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_empty_filters_return_all_sorted() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-all").await?;
    seed(&op, &ws_path).await?;

    let results = query::query_index(&op, &ws_path, &Map::new()).await?;
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "t1", "t2"]);

    Ok(())
}

#[tokio::test]
async fn test_filters_combine_with_and() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-and").await?;
    seed(&op, &ws_path).await?;

    let results =
        query::query_index(&op, &ws_path, &filters(json!({"form": "Task", "Status": "open"})))
            .await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t1");

    // Same form, contradictory property.
    let results =
        query::query_index(&op, &ws_path, &filters(json!({"form": "Note", "Status": "open"})))
            .await?;
    assert!(results.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_tag_filter_is_membership() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-tag").await?;
    seed(&op, &ws_path).await?;

    let results = query::query_index(&op, &ws_path, &filters(json!({"tag": "urgent"}))).await?;
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "t1"]);

    Ok(())
}

#[tokio::test]
async fn test_list_property_matches_by_membership() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-list").await?;
    seed(&op, &ws_path).await?;

    let results = query::query_index(&op, &ws_path, &filters(json!({"people": "grace"}))).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t2");

    let results = query::query_index(&op, &ws_path, &filters(json!({"people": "linus"}))).await?;
    assert!(results.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_top_level_fields_match_before_properties() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-top-level").await?;
    seed(&op, &ws_path).await?;
    entry::create_entry(&op, &ws_path, "tiny", "# Two words", "a1", &FakeIntegrityProvider)
        .await?;

    // "tags" is membership, same as "tag".
    let results = query::query_index(&op, &ws_path, &filters(json!({"tags": "urgent"}))).await?;
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "t1"]);

    let results = query::query_index(&op, &ws_path, &filters(json!({"word_count": 3}))).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "tiny");

    let results = query::query_index(&op, &ws_path, &filters(json!({"title": "T2"}))).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t2");

    Ok(())
}

#[tokio::test]
async fn test_absent_property_never_matches() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-absent").await?;
    seed(&op, &ws_path).await?;

    let results =
        query::query_index(&op, &ws_path, &filters(json!({"NoSuchField": "x"}))).await?;
    assert!(results.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_soft_deleted_entries_never_surface() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-deleted").await?;
    seed(&op, &ws_path).await?;

    entry::delete_entry(&op, &ws_path, "t1", false).await?;

    let results = query::query_index(&op, &ws_path, &Map::new()).await?;
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "t2"]);

    Ok(())
}

#[tokio::test]
async fn test_structured_operator_raises_not_implemented() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "query-notimpl").await?;
    seed(&op, &ws_path).await?;

    let err = query::query_index(&op, &ws_path, &filters(json!({"Status": {"$gt": "a"}})))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CoreError>(),
        Some(CoreError::NotImplemented(_))
    ));

    Ok(())
}
