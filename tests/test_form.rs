mod common;

use common::{setup_operator, setup_workspace};
use kiroku_core::error::CoreError;
use kiroku_core::integrity::FakeIntegrityProvider;
use kiroku_core::{entry, form};
use serde_json::json;

#[tokio::test]
async fn test_upsert_form_normalizes_definition() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-upsert").await?;

    let def = json!({
        "name": "Task",
        "fields": [
            {"name": "Status", "type": "string", "required": true},
            {"name": "Priority", "type": "string"}
        ]
    });
    let normalized = form::upsert_form(&op, &ws_path, &def).await?;

    assert_eq!(normalized["name"], "Task");
    assert_eq!(normalized["version"], 1);
    // Array-shaped field lists normalize to a map keyed by field name.
    assert_eq!(normalized["fields"]["Status"]["required"], true);
    assert!(normalized["fields"]["Status"].get("name").is_none());
    let template = normalized["template"].as_str().unwrap();
    assert!(template.starts_with("# Task"));
    assert!(template.contains("## Priority"));
    assert!(template.contains("## Status"));

    let stored = form::get_form(&op, &ws_path, "Task").await?;
    assert_eq!(stored, normalized);

    Ok(())
}

#[tokio::test]
async fn test_upsert_form_rejects_bad_names() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-badname").await?;

    for def in [json!({"fields": {}}), json!({"name": "../task"})] {
        let err = form::upsert_form(&op, &ws_path, &def).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Validation(_))
        ));
    }

    Ok(())
}

#[tokio::test]
async fn test_get_missing_form_is_not_found() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-missing").await?;

    let err = form::get_form(&op, &ws_path, "nope").await.unwrap_err();
    assert!(kiroku_core::error::is_not_found(&err));

    Ok(())
}

#[tokio::test]
async fn test_list_forms_sorted_by_name() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-list").await?;

    for name in ["Zeta", "Alpha", "Note"] {
        form::upsert_form(&op, &ws_path, &json!({"name": name})).await?;
    }

    let names: Vec<String> = form::list_forms(&op, &ws_path)
        .await?
        .into_iter()
        .map(|def| def["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Alpha", "Note", "Zeta"]);

    Ok(())
}

#[tokio::test]
async fn test_migration_fills_gaps_only() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-migrate-add").await?;
    let integrity = FakeIntegrityProvider;

    entry::create_entry(
        &op,
        &ws_path,
        "t1",
        "---\nform: Task\n---\n# T1\n\n## Status\nopen",
        "a1",
        &integrity,
    )
    .await?;
    entry::create_entry(
        &op,
        &ws_path,
        "t2",
        "---\nform: Task\n---\n# T2\n\n## Status\ndone\n\n## Priority\nhigh",
        "a1",
        &integrity,
    )
    .await?;
    // Different form, must not be touched.
    entry::create_entry(
        &op,
        &ws_path,
        "n1",
        "---\nform: Note\n---\n# N1\n\n## Body\ntext",
        "a1",
        &integrity,
    )
    .await?;

    let def = json!({
        "name": "Task",
        "version": 2,
        "fields": {"Status": {"type": "string"}, "Priority": {"type": "string"}}
    });
    let strategies = json!({"Priority": "normal"});
    let updated = form::migrate_form(
        &op,
        &ws_path,
        &def,
        strategies.as_object().unwrap(),
        &integrity,
    )
    .await?;
    assert_eq!(updated, 1);

    // t1 gained the missing section through a regular revision.
    let t1 = entry::get_entry_content(&op, &ws_path, "t1").await?;
    assert!(t1.markdown.contains("## Priority\nnormal"));
    let t1_history = entry::get_entry_history(&op, &ws_path, "t1").await?;
    assert_eq!(t1_history.revisions.len(), 2);
    let migration_rev =
        entry::get_revision(&op, &ws_path, "t1", &t1_history.revisions[1].revision_id).await?;
    assert_eq!(migration_rev.author, form::MIGRATION_AUTHOR);

    // t2 already had a value; the migration left it alone.
    let t2 = entry::get_entry_content(&op, &ws_path, "t2").await?;
    assert!(t2.markdown.contains("## Priority\nhigh"));
    let t2_history = entry::get_entry_history(&op, &ws_path, "t2").await?;
    assert_eq!(t2_history.revisions.len(), 1);

    // n1 belongs to another form.
    let n1_history = entry::get_entry_history(&op, &ws_path, "n1").await?;
    assert_eq!(n1_history.revisions.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_migration_drops_field_with_null_strategy() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-migrate-drop").await?;
    let integrity = FakeIntegrityProvider;

    entry::create_entry(
        &op,
        &ws_path,
        "t1",
        "---\nform: Task\n---\n# T1\n\n## Status\nopen\n\n## Legacy\nold data",
        "a1",
        &integrity,
    )
    .await?;

    let def = json!({"name": "Task", "version": 3, "fields": {"Status": {"type": "string"}}});
    let strategies = json!({"Legacy": null});
    let updated = form::migrate_form(
        &op,
        &ws_path,
        &def,
        strategies.as_object().unwrap(),
        &integrity,
    )
    .await?;
    assert_eq!(updated, 1);

    let t1 = entry::get_entry_content(&op, &ws_path, "t1").await?;
    assert!(!t1.markdown.contains("## Legacy"));
    assert!(!t1.markdown.contains("old data"));
    assert!(t1.markdown.contains("## Status\nopen"));

    // The dropped section is gone from the property map as well.
    let props = kiroku_core::markdown::extract_properties(&t1.markdown);
    assert!(props.as_object().unwrap().get("Legacy").is_none());

    Ok(())
}

#[tokio::test]
async fn test_migration_result_is_query_visible() -> anyhow::Result<()> {
    let op = setup_operator()?;
    let ws_path = setup_workspace(&op, "form-migrate-query").await?;
    let integrity = FakeIntegrityProvider;

    entry::create_entry(
        &op,
        &ws_path,
        "t1",
        "---\nform: Task\n---\n# T1\n\n## Status\nopen",
        "a1",
        &integrity,
    )
    .await?;

    let def = json!({"name": "Task", "fields": {"Priority": {"type": "string"}}});
    let strategies = json!({"Priority": "normal"});
    form::migrate_form(
        &op,
        &ws_path,
        &def,
        strategies.as_object().unwrap(),
        &integrity,
    )
    .await?;

    let filters = json!({"form": "Task"});
    let results =
        kiroku_core::query::query_index(&op, &ws_path, filters.as_object().unwrap()).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t1");
    assert_eq!(
        results[0].properties.get("Priority"),
        Some(&kiroku_core::index::PropertyValue::Text("normal".to_string()))
    );

    let filters = json!({"Priority": "normal"});
    let results =
        kiroku_core::query::query_index(&op, &ws_path, filters.as_object().unwrap()).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t1");

    Ok(())
}
