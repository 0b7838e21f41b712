mod common;

use common::{memory_engine, sample_org};
use contactdb::engine::error::{BatchError, CommitError, EngineError};
use contactdb::model::{Annotation, AuditOperation, CommandKind, Organisation};
use contactdb::store::{AnnotationOwner, ResourceKind};
use contactdb::wire::parse_organisation;
use serde_json::json;

fn org(value: serde_json::Value) -> Organisation {
    parse_organisation(value).expect("valid aggregate")
}

#[tokio::test]
async fn update_with_stored_state_changes_nothing() {
    let (engine, store) = memory_engine();
    let id = engine
        .create("alice", &org(sample_org("CERT Example")))
        .await
        .expect("create");
    let before = engine.organisation(id).await.expect("read").expect("exists");
    let audit_before = store.audit_log().await.len();
    let networks_before = store.resources(ResourceKind::Network).await;

    engine.update("alice", &before).await.expect("update");
    engine.update("alice", &before).await.expect("update again");

    let after = engine.organisation(id).await.expect("read").expect("exists");
    assert_eq!(store.audit_log().await.len(), audit_before);
    assert_eq!(store.resources(ResourceKind::Network).await, networks_before);
    assert_eq!(after.annotations, before.annotations);
    assert_eq!(after.asns, before.asns);
    assert_eq!(after.networks, before.networks);
    assert_eq!(after.fqdns, before.fqdns);
    assert_eq!(after.contacts.len(), 1);
    assert_eq!(after.national_certs.len(), 1);
}

#[tokio::test]
async fn create_audits_every_added_annotation() {
    let (engine, store) = memory_engine();
    engine
        .create("alice", &org(sample_org("CERT Example")))
        .await
        .expect("create");
    let audit = store.audit_log().await;
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().all(|entry| entry.operation == AuditOperation::Add));
    assert!(audit.iter().all(|entry| entry.user == "alice"));
    assert!(audit.iter().any(|entry| entry.object_value == "CERT Example"));
    assert!(audit.iter().any(|entry| entry.object_value == "64496"));
    assert!(audit.iter().any(|entry| entry.object_value == "192.0.2.0/24"));
}

#[tokio::test]
async fn expiry_change_is_audited_once() {
    let (engine, store) = memory_engine();
    let id = engine
        .create("alice", &org(sample_org("CERT Example")))
        .await
        .expect("create");
    let mut desired = engine.organisation(id).await.expect("read").expect("exists");
    desired.asns[0].annotations = vec![Annotation::tag("transit").with_expires("2031-01-01")];
    let audit_before = store.audit_log().await.len();

    engine.update("bob", &desired).await.expect("update");

    let audit = store.audit_log().await;
    let new_entries = &audit[audit_before..];
    assert_eq!(new_entries.len(), 1);
    assert_eq!(new_entries[0].operation, AuditOperation::Change);
    assert_eq!(new_entries[0].user, "bob");
    assert_eq!(
        new_entries[0].before.as_ref().and_then(|a| a.expires.as_deref()),
        Some("2030-01-01")
    );
    assert_eq!(
        new_entries[0].after.as_ref().and_then(|a| a.expires.as_deref()),
        Some("2031-01-01")
    );
}

#[tokio::test]
async fn shared_network_is_pruned_after_last_unlink() {
    let (engine, store) = memory_engine();
    let network = json!([{"address": "10.0.0.0/8", "comment": ""}]);
    let mut first = sample_org("CERT A");
    first["networks"] = network.clone();
    let mut second = sample_org("CERT B");
    second["networks"] = network;
    let first_id = engine.create("alice", &org(first)).await.expect("create");
    let second_id = engine.create("alice", &org(second)).await.expect("create");

    let networks = store.resources(ResourceKind::Network).await;
    assert_eq!(networks.len(), 1, "second create must reuse the row");

    let mut first = engine
        .organisation(first_id)
        .await
        .expect("read")
        .expect("exists");
    first.networks.clear();
    engine.update("alice", &first).await.expect("unlink");
    assert_eq!(store.resources(ResourceKind::Network).await, networks);

    let second = engine
        .organisation(second_id)
        .await
        .expect("read")
        .expect("exists");
    assert_eq!(
        engine.delete("alice", &second).await.expect("delete"),
        Some(second_id)
    );
    assert!(store.resources(ResourceKind::Network).await.is_empty());
}

#[tokio::test]
async fn unlinking_a_shared_network_cuts_its_annotations() {
    let (engine, store) = memory_engine();
    let first_id = engine
        .create("alice", &org(sample_org("CERT A")))
        .await
        .expect("create");
    let second_id = engine
        .create("alice", &org(sample_org("CERT B")))
        .await
        .expect("create");
    let networks = store.resources(ResourceKind::Network).await;
    assert_eq!(networks.len(), 1);
    let network_id = networks[0].0;
    let audit_before = store.audit_log().await.len();

    let mut first = engine
        .organisation(first_id)
        .await
        .expect("read")
        .expect("exists");
    first.networks.clear();
    engine.update("bob", &first).await.expect("unlink");

    assert_eq!(store.resources(ResourceKind::Network).await, networks);
    assert!(
        store
            .stored_annotations(AnnotationOwner::Network(network_id))
            .await
            .is_empty()
    );
    let new_entries = store.audit_log().await.split_off(audit_before);
    assert_eq!(new_entries.len(), 1);
    assert_eq!(new_entries[0].operation, AuditOperation::Remove);
    assert_eq!(new_entries[0].object_value, "192.0.2.0/24");
    assert_eq!(new_entries[0].user, "bob");

    let second = engine
        .organisation(second_id)
        .await
        .expect("read")
        .expect("exists");
    assert!(second.networks[0].annotations.is_empty());
}

#[tokio::test]
async fn linking_an_existing_network_keeps_its_comment() {
    let (engine, _store) = memory_engine();
    let first_id = engine
        .create("alice", &org(sample_org("CERT A")))
        .await
        .expect("create");
    let mut second = sample_org("CERT B");
    second["networks"][0]["comment"] = json!("edited by B");
    engine.create("bob", &org(second)).await.expect("create");

    let first = engine
        .organisation(first_id)
        .await
        .expect("read")
        .expect("exists");
    assert_eq!(first.networks[0].comment, "lab");
    assert_eq!(
        engine.delete("alice", &first).await.expect("delete"),
        Some(first_id)
    );
}

#[tokio::test]
async fn duplicate_asns_keep_the_first_occurrence() {
    let (engine, store) = memory_engine();
    let mut value = sample_org("CERT Example");
    value["asns"] = json!([
        {"asn": 64500, "annotations": [{"tag": "first"}]},
        {"asn": 64500, "annotations": [{"tag": "second"}]}
    ]);
    let id = engine.create("alice", &org(value)).await.expect("create");

    let stored = engine.organisation(id).await.expect("read").expect("exists");
    assert_eq!(stored.asns.len(), 1);
    assert_eq!(
        store.stored_annotations(AnnotationOwner::Asn(64500)).await,
        vec![Annotation::tag("first")]
    );
}

#[tokio::test]
async fn asn_annotations_survive_while_another_org_links_the_number() {
    let (engine, store) = memory_engine();
    let first_id = engine
        .create("alice", &org(sample_org("CERT A")))
        .await
        .expect("create");
    engine
        .create("alice", &org(sample_org("CERT B")))
        .await
        .expect("create");

    let mut first = engine
        .organisation(first_id)
        .await
        .expect("read")
        .expect("exists");
    first.asns.clear();
    engine.update("alice", &first).await.expect("update");

    let details = engine.asn(64496).await.expect("asn").expect("still linked");
    assert_eq!(details.organisation_ids.len(), 1);
    assert_eq!(
        store.stored_annotations(AnnotationOwner::Asn(64496)).await.len(),
        1
    );
}

#[tokio::test]
async fn networks_are_stored_in_canonical_form() {
    let (engine, _store) = memory_engine();
    let mut value = sample_org("CERT Example");
    value["networks"] = json!([{"address": "192.0.2.7", "comment": "host"}]);
    let id = engine.create("alice", &org(value)).await.expect("create");
    let stored = engine.organisation(id).await.expect("read").expect("exists");
    assert_eq!(stored.networks[0].address, "192.0.2.7/32");
}

#[tokio::test]
async fn failing_command_rolls_back_the_whole_batch() {
    let (engine, store) = memory_engine();
    let mut broken = sample_org("CERT B");
    broken["contacts"][0]["email"] = json!(null);
    let err = engine
        .apply_batch(
            "alice",
            &json!({
                "commands": ["create", "create"],
                "orgs": [sample_org("CERT A"), broken]
            }),
        )
        .await
        .expect_err("second command fails");
    assert!(matches!(err, BatchError::CommitFailed));
    assert_eq!(store.organisation_count().await, 0);
    assert!(store.audit_log().await.is_empty());
    assert!(store.resources(ResourceKind::Network).await.is_empty());
}

#[tokio::test]
async fn schema_violations_are_reported_with_paths() {
    let (engine, store) = memory_engine();
    let mut invalid = sample_org("CERT A");
    invalid["asns"][0]["asn"] = json!("AS64496");
    let err = engine
        .apply_batch(
            "alice",
            &json!({"commands": ["create"], "orgs": [invalid]}),
        )
        .await
        .expect_err("invalid");
    match err {
        BatchError::Validation(violations) => {
            assert!(violations.iter().any(|v| v.path == "/asns/0/asn"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.organisation_count().await, 0);
}

#[tokio::test]
async fn schema_violation_in_later_command_rolls_back_earlier_ones() {
    let (engine, store) = memory_engine();
    let mut invalid = sample_org("CERT B");
    invalid["networks"][0]["address"] = json!(17);
    let err = engine
        .apply_batch(
            "alice",
            &json!({
                "commands": ["create", "create"],
                "orgs": [sample_org("CERT A"), invalid]
            }),
        )
        .await
        .expect_err("second command is invalid");
    match err {
        BatchError::Validation(violations) => {
            assert!(violations.iter().any(|v| v.path == "/networks/0/address"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.organisation_count().await, 0);
    assert!(store.audit_log().await.is_empty());
    assert!(store.resources(ResourceKind::Network).await.is_empty());
}

#[tokio::test]
async fn partial_update_is_rejected_and_keeps_children() {
    let (engine, store) = memory_engine();
    let id = engine
        .create("alice", &org(sample_org("CERT Example")))
        .await
        .expect("create");
    let before = engine.organisation(id).await.expect("read").expect("exists");
    let audit_before = store.audit_log().await.len();

    let err = engine
        .apply_batch(
            "alice",
            &json!({
                "commands": ["update"],
                "orgs": [{"organisation_id": id, "name": "CERT Example"}]
            }),
        )
        .await
        .expect_err("name-only update");
    assert!(matches!(err, BatchError::Validation(_)));

    let after = engine.organisation(id).await.expect("read").expect("exists");
    assert_eq!(after, before);
    assert_eq!(after.contacts.len(), 1);
    assert_eq!(after.networks.len(), 1);
    assert_eq!(after.asns.len(), 1);
    assert_eq!(store.audit_log().await.len(), audit_before);
}

#[tokio::test]
async fn batch_returns_results_in_command_order() {
    let (engine, _store) = memory_engine();
    let created = engine
        .apply_batch(
            "alice",
            &json!({
                "commands": ["create", "create"],
                "orgs": [sample_org("CERT A"), sample_org("CERT B")]
            }),
        )
        .await
        .expect("create batch");
    let ids: Vec<i64> = created.iter().filter_map(|(_, id)| *id).collect();
    assert_eq!(ids.len(), 2);
    assert!(created.iter().all(|(kind, _)| *kind == CommandKind::Create));

    let mut renamed = engine.organisation(ids[0]).await.expect("read").expect("exists");
    renamed.name = Some("CERT A renamed".to_string());
    let doomed = engine.organisation(ids[1]).await.expect("read").expect("exists");
    let results = engine
        .apply_batch(
            "alice",
            &json!({
                "commands": ["update", "delete"],
                "orgs": [renamed, doomed]
            }),
        )
        .await
        .expect("mixed batch");
    assert_eq!(
        results,
        vec![
            (CommandKind::Update, Some(ids[0])),
            (CommandKind::Delete, Some(ids[1]))
        ]
    );
    let stored = engine.organisation(ids[0]).await.expect("read").expect("exists");
    assert_eq!(stored.name.as_deref(), Some("CERT A renamed"));
    assert!(engine.organisation(ids[1]).await.expect("read").is_none());
}

#[tokio::test]
async fn update_of_unknown_organisation_fails() {
    let (engine, _store) = memory_engine();
    let mut value = sample_org("Ghost");
    value["organisation_id"] = json!(999);
    let err = engine.update("alice", &org(value)).await.expect_err("missing");
    assert!(matches!(
        err,
        EngineError::Commit(CommitError::UpdateTargetMissing { id: 999 })
    ));
}

#[tokio::test]
async fn empty_name_is_rejected_on_update() {
    let (engine, _store) = memory_engine();
    let id = engine
        .create("alice", &org(sample_org("CERT Example")))
        .await
        .expect("create");
    let mut desired = engine.organisation(id).await.expect("read").expect("exists");
    desired.name = Some(String::new());
    let err = engine.update("alice", &desired).await.expect_err("empty name");
    assert!(matches!(err, EngineError::Commit(CommitError::EmptyName)));
    let stored = engine.organisation(id).await.expect("read").expect("exists");
    assert_eq!(stored.name.as_deref(), Some("CERT Example"));
}

#[tokio::test]
async fn delete_requires_matching_stored_state() {
    let (engine, store) = memory_engine();
    let mut value = sample_org("CERT Example");
    value["annotations"] = json!([{"tag": "government", "expires": ""}]);
    let id = engine.create("alice", &org(value)).await.expect("create");
    let stored = engine.organisation(id).await.expect("read").expect("exists");

    let mut stale = stored.clone();
    stale.comment = Some("edited elsewhere".to_string());
    let err = engine.delete("alice", &stale).await.expect_err("stale");
    assert!(matches!(
        err,
        EngineError::Commit(CommitError::StaleDelete { .. })
    ));
    assert_eq!(store.organisation_count().await, 1);

    let mut without_expiry = stored;
    without_expiry.annotations = vec![Annotation::tag("government")];
    assert_eq!(
        engine.delete("alice", &without_expiry).await.expect("delete"),
        Some(id)
    );
    assert_eq!(store.organisation_count().await, 0);
    assert!(store.resources(ResourceKind::Fqdn).await.is_empty());
    assert!(engine.asn(64496).await.expect("asn").is_none());
}

#[tokio::test]
async fn delete_of_missing_organisation_fails() {
    let (engine, _store) = memory_engine();
    let mut value = sample_org("Ghost");
    value["organisation_id"] = json!(7);
    let err = engine.delete("alice", &org(value)).await.expect_err("missing");
    assert!(matches!(
        err,
        EngineError::Commit(CommitError::DeleteTargetMissing { id: 7 })
    ));
}
