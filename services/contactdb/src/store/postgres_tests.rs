//! Postgres store tests against a real database.
//!
//! # Purpose
//! Exercise the SQL behind the `StoreTx` primitives: jsonb annotation equality, `cidr`
//! lookups, orphan pruning and transaction rollback.
//!
//! # How to use
//! Set `CONTACTDB_TEST_DATABASE_URL` (or `DATABASE_URL`) to a disposable database and run
//! `cargo test -p contactdb --features pg-tests`. Tests are skipped when neither is set.
//! Every test truncates all contactdb tables first; never point this at real data.
use super::postgres::PostgresStore;
use super::{AnnotationOwner, ContactStore, LeafKind, ResourceKind, StoreTx, TableSet};
use crate::config::PostgresConfig;
use crate::model::{Annotation, AuditLogEntry, AuditOperation, Condition, FieldRef, OrganisationRow};
use serde_json::json;
use serial_test::serial;

const TABLES: &str = "audit_log, fqdn_annotation, organisation_to_fqdn, fqdn, \
    network_annotation, organisation_to_network, network, national_cert, contact, \
    autonomous_system_annotation, organisation_to_asn, organisation_annotation, organisation, \
    organisation_to_fqdn_automatic, fqdn_automatic, organisation_to_network_automatic, \
    network_automatic, national_cert_automatic, contact_automatic, \
    organisation_to_asn_automatic, organisation_automatic";

fn database_url() -> Option<String> {
    std::env::var("CONTACTDB_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

async fn fresh_store() -> Option<PostgresStore> {
    let Some(url) = database_url() else {
        eprintln!("skipping postgres test: CONTACTDB_TEST_DATABASE_URL not set");
        return None;
    };
    let store = PostgresStore::connect(&PostgresConfig {
        url,
        max_connections: 2,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    })
    .await
    .expect("connect test database");
    sqlx::query(&format!("TRUNCATE {TABLES} RESTART IDENTITY CASCADE"))
        .execute(store.pool())
        .await
        .expect("truncate");
    Some(store)
}

fn row(name: &str) -> OrganisationRow {
    OrganisationRow {
        name: name.to_string(),
        ..OrganisationRow::default()
    }
}

#[tokio::test]
#[serial]
async fn annotation_delete_ignores_condition_key_order() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let stored = Annotation::tag("inhibition").with_condition(Condition::new(
        "eq",
        FieldRef::event_field("extra"),
        json!({"a": 1, "b": [1, 2]}),
    ));
    let reordered: Annotation = serde_json::from_str(
        r#"{"tag":"inhibition","condition":["eq",["event_field","extra"],{"b":[1,2],"a":1}]}"#,
    )
    .expect("annotation");

    let mut tx = store.begin().await.expect("begin");
    let id = tx.insert_organisation(&row("CERT A")).await.expect("insert");
    let owner = AnnotationOwner::Organisation(id);
    tx.insert_annotation(owner, &stored).await.expect("annotate");
    tx.delete_annotation(owner, &reordered).await.expect("delete");
    assert!(tx.annotations(owner).await.expect("list").is_empty());
    tx.commit().await.expect("commit");
}

#[tokio::test]
#[serial]
async fn networks_are_found_by_cidr_value() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let mut tx = store.begin().await.expect("begin");
    let id = tx
        .insert_resource(ResourceKind::Network, "192.0.2.0/24", "lab")
        .await
        .expect("insert");
    let found = tx
        .find_resource(ResourceKind::Network, "192.0.2.0/24")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(found.id, id);
    assert_eq!(found.key, "192.0.2.0/24");
    assert_eq!(found.comment, "lab");
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[serial]
async fn prune_removes_unlinked_resources_and_their_annotations() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let mut tx = store.begin().await.expect("begin");
    let org = tx.insert_organisation(&row("CERT A")).await.expect("org");
    let linked = tx
        .insert_resource(ResourceKind::Fqdn, "linked.example", "")
        .await
        .expect("fqdn");
    let orphan = tx
        .insert_resource(ResourceKind::Fqdn, "orphan.example", "")
        .await
        .expect("fqdn");
    tx.link_resource(ResourceKind::Fqdn, org, linked)
        .await
        .expect("link");
    tx.insert_annotation(AnnotationOwner::Fqdn(orphan), &Annotation::tag("stale"))
        .await
        .expect("annotate");

    assert_eq!(tx.prune_resources(ResourceKind::Fqdn).await.expect("prune"), 1);
    let remaining = tx
        .linked_resources(TableSet::Manual, ResourceKind::Fqdn, org)
        .await
        .expect("linked");
    assert_eq!(remaining.len(), 1);
    assert!(
        tx.find_resource(ResourceKind::Fqdn, "orphan.example")
            .await
            .expect("find")
            .is_none()
    );
    tx.commit().await.expect("commit");
}

#[tokio::test]
#[serial]
async fn asn_links_and_orphan_annotations() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let mut tx = store.begin().await.expect("begin");
    let org = tx.insert_organisation(&row("CERT A")).await.expect("org");
    tx.link_asn(org, 64496).await.expect("link");
    tx.link_asn(org, 64497).await.expect("link");
    tx.insert_annotation(AnnotationOwner::Asn(64497), &Annotation::tag("transit"))
        .await
        .expect("annotate");

    assert_eq!(tx.unlink_asns_except(org, &[64496]).await.expect("unlink"), 1);
    assert_eq!(tx.linked_asns(TableSet::Manual, org).await.expect("linked"), vec![64496]);
    assert_eq!(tx.prune_asn_annotations().await.expect("prune"), 1);
    assert!(tx.asn_organisations(64497).await.expect("orgs").is_empty());
    tx.commit().await.expect("commit");
}

#[tokio::test]
#[serial]
async fn rollback_discards_every_write() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let mut tx = store.begin().await.expect("begin");
    let org = tx.insert_organisation(&row("CERT A")).await.expect("org");
    tx.insert_leaf(
        LeafKind::NationalCert,
        org,
        &["DE".to_string(), String::new()],
    )
    .await
    .expect("leaf");
    tx.append_audit(&AuditLogEntry {
        table: "organisation_annotation".to_string(),
        user: "alice".to_string(),
        operation: AuditOperation::Add,
        object_type: "organisation".to_string(),
        object_value: "CERT A".to_string(),
        before: None,
        after: Some(Annotation::tag("x")),
    })
    .await
    .expect("audit");
    tx.rollback().await.expect("rollback");

    let mut tx = store.begin().await.expect("begin");
    assert!(tx.organisation_row(TableSet::Manual, org).await.expect("row").is_none());
    assert!(
        tx.leaves(TableSet::Manual, LeafKind::NationalCert, org)
            .await
            .expect("leaves")
            .is_empty()
    );
    tx.rollback().await.expect("rollback");

    let (audit_rows,): (i64,) = sqlx::query_as("SELECT count(*) FROM audit_log")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(audit_rows, 0);
}

#[tokio::test]
#[serial]
async fn health_check_reports_reachable_database() {
    let Some(store) = fresh_store().await else {
        return;
    };
    store.health_check().await.expect("healthy");
    assert!(store.is_durable());
    assert_eq!(store.backend_name(), "postgres");
}

#[tokio::test]
#[serial]
async fn automatic_tables_are_read_with_their_own_keys() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let pool = store.pool();
    let (org,): (i64,) = sqlx::query_as(
        "INSERT INTO organisation_automatic (name, import_source) VALUES ('Imported', 'ripe') \
         RETURNING organisation_automatic_id",
    )
    .fetch_one(pool)
    .await
    .expect("org");
    sqlx::query(
        "INSERT INTO organisation_to_asn_automatic (organisation_automatic_id, asn, import_source) \
         VALUES ($1, 64496, 'ripe')",
    )
    .bind(org)
    .execute(pool)
    .await
    .expect("asn");
    sqlx::query(
        "INSERT INTO contact_automatic (organisation_automatic_id, email, import_source) \
         VALUES ($1, 'abuse@example.org', 'ripe')",
    )
    .bind(org)
    .execute(pool)
    .await
    .expect("contact");
    let (network,): (i64,) = sqlx::query_as(
        "INSERT INTO network_automatic (address, import_source) VALUES ('198.51.100.0/24', 'ripe') \
         RETURNING network_automatic_id",
    )
    .fetch_one(pool)
    .await
    .expect("network");
    sqlx::query(
        "INSERT INTO organisation_to_network_automatic \
            (organisation_automatic_id, network_automatic_id, import_source) \
         VALUES ($1, $2, 'ripe')",
    )
    .bind(org)
    .bind(network)
    .execute(pool)
    .await
    .expect("link");

    let mut tx = store.begin().await.expect("begin");
    let row = tx
        .organisation_row(TableSet::Automatic, org)
        .await
        .expect("row")
        .expect("imported");
    assert_eq!(row.name, "Imported");
    assert_eq!(
        tx.linked_asns(TableSet::Automatic, org).await.expect("asns"),
        vec![64496]
    );
    let contacts = tx
        .leaves(TableSet::Automatic, LeafKind::Contact, org)
        .await
        .expect("contacts");
    assert_eq!(contacts[0].values[4], "abuse@example.org");
    let networks = tx
        .linked_resources(TableSet::Automatic, ResourceKind::Network, org)
        .await
        .expect("networks");
    assert_eq!(networks[0].key, "198.51.100.0/24");
    assert!(
        tx.organisation_row(TableSet::Manual, org)
            .await
            .expect("manual")
            .is_none()
    );
    tx.rollback().await.expect("rollback");
}
