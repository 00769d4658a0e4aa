//! Integration tests for per-caller visibility views and marking management.

mod common;

use common::{client, individual, member_of, organisation, tool};
use cti_graph::client::SearchRequest;
use cti_graph::mapping::INTEL_ALIAS;
use cti_graph::MarkingError;
use cti_graph_repository::{Query, SearchBackend};
use cti_graph_shared::marking::{pii_marking_id, Tlp};
use cti_graph_shared::{Entity, EntityType, StixId};

async fn visible(client: &cti_graph::IntelClient, caller: &StixId) -> Vec<StixId> {
    client
        .search(caller, &SearchRequest::new(Query::MatchAll))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect()
}

#[tokio::test]
async fn test_caller_without_org_sees_unmarked_and_open_only() {
    let (client, _) = client().await;
    let system = client.system().identity().clone();

    let unmarked = tool("unmarked");
    let white = tool("white").with_markings(&[Tlp::White.id()]);
    let amber = tool("amber").with_markings(&[Tlp::Amber.id()]);
    let person = individual("someone").with_markings(&[pii_marking_id()]);
    client
        .index_entities(
            &system,
            &[unmarked.clone(), white.clone(), amber.clone(), person.clone()],
            false,
        )
        .await
        .unwrap();

    let stranger = StixId::generate(EntityType::Identity);
    let seen = visible(&client, &stranger).await;
    assert!(seen.contains(&unmarked.id));
    assert!(seen.contains(&white.id));
    assert!(!seen.contains(&amber.id));
    assert!(!seen.contains(&person.id));
    assert!(!seen.contains(client.system().identity()));
}

#[tokio::test]
async fn test_distribution_reaches_named_identities_and_their_org() {
    let (client, _) = client().await;
    let analyst = individual("analyst");
    let colleague = individual("colleague");
    let org = organisation("Acme");
    let outsider = individual("outsider");
    client
        .index_entities(
            &analyst.id,
            &[
                analyst.clone(),
                colleague.clone(),
                org.clone(),
                outsider.clone(),
                member_of(&analyst.id, &org.id),
                member_of(&colleague.id, &org.id),
            ],
            false,
        )
        .await
        .unwrap();

    let to_analyst = client
        .create_distribution_marking(&analyst.id, "analyst only", &Tlp::Amber.id(), &[analyst.id.clone()])
        .await
        .unwrap();
    let to_org = client
        .create_distribution_marking(&analyst.id, "acme", &Tlp::Red.id(), &[org.id.clone()])
        .await
        .unwrap();

    let private = tool("private").with_markings(&[to_analyst]);
    let shared = tool("shared").with_markings(&[to_org]);
    client
        .index_entities(&analyst.id, &[private.clone(), shared.clone()], false)
        .await
        .unwrap();

    let seen = visible(&client, &analyst.id).await;
    assert!(seen.contains(&private.id));
    assert!(seen.contains(&shared.id));

    let seen = visible(&client, &colleague.id).await;
    assert!(!seen.contains(&private.id));
    assert!(seen.contains(&shared.id));

    let seen = visible(&client, &outsider.id).await;
    assert!(!seen.contains(&private.id));
    assert!(!seen.contains(&shared.id));
}

#[tokio::test]
async fn test_open_marking_does_not_unlock_other_markings() {
    let (client, _) = client().await;
    let analyst = individual("analyst");
    client
        .index_entity(&analyst.id, &analyst, false)
        .await
        .unwrap();
    let to_analyst = client
        .create_distribution_marking(&analyst.id, "analyst only", &Tlp::Red.id(), &[analyst.id.clone()])
        .await
        .unwrap();

    let white_and_amber = tool("white and amber").with_markings(&[Tlp::White.id(), Tlp::Amber.id()]);
    let white_and_private = tool("white and private").with_markings(&[Tlp::White.id(), to_analyst]);
    let white_only = tool("white only").with_markings(&[Tlp::White.id()]);
    client
        .index_entities(
            &analyst.id,
            &[white_and_amber.clone(), white_and_private.clone(), white_only.clone()],
            false,
        )
        .await
        .unwrap();

    let stranger = StixId::generate(EntityType::Identity);
    let seen = visible(&client, &stranger).await;
    assert!(seen.contains(&white_only.id));
    assert!(!seen.contains(&white_and_amber.id));
    assert!(!seen.contains(&white_and_private.id));

    let seen = visible(&client, &analyst.id).await;
    assert!(seen.contains(&white_and_private.id));
    assert!(!seen.contains(&white_and_amber.id));
}

#[tokio::test]
async fn test_pii_with_other_markings_stays_hidden_from_org() {
    let (client, _) = client().await;
    let analyst = individual("analyst").with_markings(&[pii_marking_id()]);
    let org = organisation("Acme").with_markings(&[pii_marking_id(), Tlp::Red.id()]);
    let colleague = individual("colleague").with_markings(&[pii_marking_id(), Tlp::Amber.id()]);
    client
        .index_entities(
            &analyst.id,
            &[
                analyst.clone(),
                org.clone(),
                colleague.clone(),
                member_of(&analyst.id, &org.id),
                member_of(&colleague.id, &org.id),
            ],
            false,
        )
        .await
        .unwrap();

    let seen = visible(&client, &analyst.id).await;
    assert!(seen.contains(&analyst.id));
    assert!(!seen.contains(&org.id));
    assert!(!seen.contains(&colleague.id));
}

#[tokio::test]
async fn test_pii_visible_within_org_chart_only() {
    let (client, _) = client().await;
    let pii = [pii_marking_id()];
    let analyst = individual("analyst").with_markings(&pii);
    let colleague = individual("colleague").with_markings(&pii);
    let org = organisation("Acme").with_markings(&pii);
    let outsider = individual("outsider").with_markings(&pii);
    client
        .index_entities(
            &analyst.id,
            &[
                analyst.clone(),
                colleague.clone(),
                org.clone(),
                outsider.clone(),
                member_of(&analyst.id, &org.id),
                member_of(&colleague.id, &org.id),
            ],
            false,
        )
        .await
        .unwrap();

    let seen = visible(&client, &analyst.id).await;
    assert!(seen.contains(&analyst.id));
    assert!(seen.contains(&colleague.id));
    assert!(seen.contains(&org.id));
    assert!(!seen.contains(&outsider.id));

    let seen = visible(&client, &outsider.id).await;
    assert!(seen.contains(&outsider.id));
    assert!(!seen.contains(&analyst.id));
}

#[tokio::test]
async fn test_new_distribution_marking_extends_existing_view() {
    let (client, backend) = client().await;
    let analyst = individual("analyst");
    client
        .index_entity(&analyst.id, &analyst, false)
        .await
        .unwrap();

    let view = client
        .visible_view(&analyst.id, INTEL_ALIAS, false)
        .await
        .unwrap();
    let before = visible(&client, &analyst.id).await;

    let marking = client
        .create_distribution_marking(&analyst.id, "late", &Tlp::Amber.id(), &[analyst.id.clone()])
        .await
        .unwrap();
    let marked = tool("late").with_markings(&[marking]);
    client
        .index_entity(&analyst.id, &marked, false)
        .await
        .unwrap();

    // Same slice, same alias, no rebuild.
    let again = client
        .visible_view(&analyst.id, INTEL_ALIAS, false)
        .await
        .unwrap();
    assert_eq!(view, again);
    assert!(backend.alias_exists(view.alias()).await.unwrap());

    let after = visible(&client, &analyst.id).await;
    assert!(after.contains(&marked.id));
    assert!(before.iter().all(|id| after.contains(id)));
}

#[tokio::test]
async fn test_distribution_marking_creation_rules() {
    let (client, _) = client().await;
    let analyst = StixId::generate(EntityType::Identity);
    let a = StixId::generate(EntityType::Identity);
    let b = StixId::generate(EntityType::Identity);

    let first = client
        .create_distribution_marking(&analyst, "pair", &Tlp::Amber.id(), &[a.clone(), b.clone()])
        .await
        .unwrap();
    let second = client
        .create_distribution_marking(&analyst, "pair", &Tlp::Amber.id(), &[b.clone(), a.clone()])
        .await
        .unwrap();
    assert_eq!(first, second);

    let green = client
        .create_distribution_marking(&analyst, "pair", &Tlp::Green.id(), &[a.clone()])
        .await;
    assert!(matches!(green, Err(MarkingError::InvalidTlpBase(_))));

    let not_identity = StixId::generate(EntityType::Tool);
    let result = client
        .create_distribution_marking(&not_identity, "pair", &Tlp::Red.id(), &[a])
        .await;
    assert!(matches!(result, Err(MarkingError::InvalidCaller(_))));
}

#[tokio::test]
async fn test_added_open_marking_is_visible_after_refresh() {
    let (client, _) = client().await;
    let system = client.system().identity().clone();

    let statement = Entity::new(EntityType::MarkingDefinition)
        .with_author(&system)
        .with_property("name", "Community")
        .with_property("definition_type", "statement")
        .with_property("definition", serde_json::json!({"statement": "Community data"}));
    let community = tool("community").with_markings(&[statement.id.clone()]);
    client
        .index_entities(&system, &[statement.clone(), community.clone()], false)
        .await
        .unwrap();

    let reader = StixId::generate(EntityType::Identity);
    assert!(!visible(&client, &reader).await.contains(&community.id));

    let grouping = client
        .add_open_marking(&system, &statement.id)
        .await
        .unwrap();
    assert_ne!(
        grouping,
        cti_graph_shared::marking::open_markings_group_id(&system)
    );

    client
        .visible_view(&reader, INTEL_ALIAS, true)
        .await
        .unwrap();
    assert!(visible(&client, &reader).await.contains(&community.id));

    // Registering it twice changes nothing.
    let again = client.add_open_marking(&system, &statement.id).await.unwrap();
    assert_eq!(grouping, again);
}

#[tokio::test]
async fn test_get_objects_goes_through_the_view() {
    let (client, _) = client().await;
    let open = tool("open");
    let amber = tool("amber").with_markings(&[Tlp::Amber.id()]);
    let reader = StixId::generate(EntityType::Identity);
    client
        .index_entities(&reader, &[open.clone(), amber.clone()], false)
        .await
        .unwrap();

    let objects = client
        .get_objects(&reader, &[open.id.clone(), amber.id.clone()])
        .await
        .unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, open.id);
    assert!(client.get_object(&reader, &amber.id).await.unwrap().is_none());

    // The unrestricted store still has it.
    assert!(client.store().get(&amber.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_get_objects_matching_filters_by_text() {
    let (client, _) = client().await;
    let hammer = tool("claw hammer");
    let wrench = tool("pipe wrench");
    let secret = tool("sledge hammer").with_markings(&[Tlp::Red.id()]);
    let reader = StixId::generate(EntityType::Identity);
    client
        .index_entities(&reader, &[hammer.clone(), wrench.clone(), secret.clone()], false)
        .await
        .unwrap();

    let all = [hammer.id.clone(), wrench.id.clone(), secret.id.clone()];
    let found = client
        .get_objects_matching(&reader, &all, &["hammer"])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, hammer.id);

    let either = client
        .get_objects_matching(&reader, &all, &["HAMMER", "pipe"])
        .await
        .unwrap();
    assert_eq!(either.len(), 2);

    let unfiltered = client.get_objects_matching(&reader, &all, &[]).await.unwrap();
    assert_eq!(unfiltered.len(), 2);
}
