//! Integration tests for mapping synchronization through the client.

mod common;

use chrono::{Days, Utc};
use common::{client, tool};
use cti_graph::client::SearchRequest;
use cti_graph::mapping::{PropertyKind, PropertySchemas, SyncOutcome, INTEL_ALIAS};
use cti_graph_repository::{Query, SearchBackend};
use cti_graph_shared::{EntityType, StixId};

#[tokio::test]
async fn test_second_setup_changes_nothing() {
    let (client, _) = client().await;
    let report = client.setup(&PropertySchemas::builtin()).await.unwrap();
    assert!(report.is_clean());
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, Ok(SyncOutcome::Unchanged))));
}

#[tokio::test]
async fn test_schema_change_migrates_on_the_next_day() {
    let (client, backend) = client().await;
    let reader = StixId::generate(EntityType::Identity);
    let hammer = tool("hammer");
    client.index_entity(&reader, &hammer, false).await.unwrap();

    let mut changed = PropertySchemas::builtin()
        .get(EntityType::Tool)
        .unwrap()
        .clone();
    changed.insert("x_vendor", PropertyKind::Taxonomy);

    let today = client
        .mapping()
        .sync_mapping(EntityType::Tool, &changed)
        .await
        .unwrap();
    assert!(matches!(today, SyncOutcome::AlreadyMigratedToday { .. }));

    let tomorrow = Utc::now().date_naive().checked_add_days(Days::new(1)).unwrap();
    let outcome = client
        .mapping()
        .sync_mapping_on(EntityType::Tool, &changed, tomorrow)
        .await
        .unwrap();
    let SyncOutcome::Migrated { from, to } = outcome else {
        panic!("expected a migration, got {:?}", outcome);
    };
    assert_eq!(from.len(), 1);
    assert_eq!(backend.indices_for_alias("tool").await.unwrap(), vec![to.clone()]);
    assert!(backend.indices_for_alias(INTEL_ALIAS).await.unwrap().contains(&to));
    assert!(!backend.indices_for_alias(INTEL_ALIAS).await.unwrap().contains(&from[0]));

    // The entity moved with its index.
    assert!(client.store().get(&hammer.id).await.unwrap().is_some());

    // A refreshed view follows the aliases onto the new index.
    client.visible_view(&reader, INTEL_ALIAS, true).await.unwrap();
    let found = client
        .search(&reader, &SearchRequest::new(Query::term("name", "hammer")))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, hammer.id);

    let settled = client
        .mapping()
        .sync_mapping_on(EntityType::Tool, &changed, tomorrow)
        .await
        .unwrap();
    assert_eq!(settled, SyncOutcome::Unchanged);
}

#[tokio::test]
async fn test_existing_views_survive_migration() {
    let (client, backend) = client().await;
    let reader = StixId::generate(EntityType::Identity);
    let hammer = tool("hammer");
    client.index_entity(&reader, &hammer, false).await.unwrap();

    // Builds and caches today's view before the migration.
    let before = client
        .search(&reader, &SearchRequest::new(Query::term("type", "tool")))
        .await
        .unwrap();
    assert_eq!(before.len(), 1);
    let view = client.visible_view(&reader, INTEL_ALIAS, false).await.unwrap();

    let mut changed = PropertySchemas::builtin()
        .get(EntityType::Tool)
        .unwrap()
        .clone();
    changed.insert("x_vendor", PropertyKind::Taxonomy);
    let tomorrow = Utc::now().date_naive().checked_add_days(Days::new(1)).unwrap();
    let SyncOutcome::Migrated { from, to } = client
        .mapping()
        .sync_mapping_on(EntityType::Tool, &changed, tomorrow)
        .await
        .unwrap()
    else {
        panic!("expected a migration");
    };
    let behind = backend.indices_for_alias(view.alias()).await.unwrap();
    assert!(behind.contains(&to));
    assert!(!behind.contains(&from[0]));

    // Without a refresh, the same view sees old and new documents.
    let wrench = tool("wrench");
    client.index_entity(&reader, &wrench, false).await.unwrap();
    let after = client
        .search(&reader, &SearchRequest::new(Query::term("type", "tool")))
        .await
        .unwrap();
    let ids: Vec<StixId> = after.into_iter().map(|e| e.id).collect();
    assert!(ids.contains(&hammer.id));
    assert!(ids.contains(&wrench.id));
}

#[tokio::test]
async fn test_custom_schemas_only_touch_listed_types() {
    let (client, _) = client().await;
    let schemas = PropertySchemas::from_json_str(
        r#"{"indicator": {"pattern": "text", "x_confidence_band": "taxonomy"}}"#,
    )
    .unwrap();
    assert_eq!(schemas.len(), 1);

    let report = client.mapping().sync_all(&schemas).await;
    assert_eq!(report.outcomes.len(), 1);
    assert!(matches!(
        report.outcome(EntityType::Indicator),
        Some(Ok(SyncOutcome::AlreadyMigratedToday { .. }))
    ));
    assert!(report.outcome(EntityType::Tool).is_none());
}
