//! Create, update and delete of a whole organisation aggregate.
//!
//! # Purpose
//! Sequences the annotation, ASN, leaf and shared-resource synchronizers in dependency order
//! and enforces the aggregate-level rules (non-empty name, update target exists, delete target
//! matches stored state).
//!
//! # Notes
//! All functions run inside the caller's transaction and never commit or roll back.
use crate::engine::Session;
use crate::engine::diff::AnnotationMode;
use crate::engine::error::{CommitError, EngineResult};
use crate::engine::leaf::{load_leaves, sync_leaves};
use crate::engine::shared::{
    desired_fqdns, desired_networks, reconcile_annotations, sync_asns, sync_resources,
};
use crate::model::{
    Annotation, AsnDetails, AsnLink, Contact, Fqdn, NationalCert, Network, Organisation,
    OrganisationRow,
};
use crate::store::{AnnotationOwner, ResourceKind, StoreResult, StoreTx, TableSet};

/// Loads the full aggregate from one table family, or `None` when it has no such id.
///
/// Automatic entries carry no annotations, so those are only read for [`TableSet::Manual`].
pub async fn load_organisation(
    tx: &mut dyn StoreTx,
    set: TableSet,
    id: i64,
) -> StoreResult<Option<Organisation>> {
    let Some(row) = tx.organisation_row(set, id).await? else {
        return Ok(None);
    };
    let annotated = set == TableSet::Manual;
    let annotations = annotations_of(tx, annotated, AnnotationOwner::Organisation(id)).await?;

    let mut asns = Vec::new();
    for asn in tx.linked_asns(set, id).await? {
        asns.push(AsnLink {
            asn,
            annotations: annotations_of(tx, annotated, AnnotationOwner::Asn(asn)).await?,
        });
    }

    let contacts: Vec<Contact> = load_leaves(tx, set, id).await?;
    let national_certs: Vec<NationalCert> = load_leaves(tx, set, id).await?;

    let mut networks = Vec::new();
    for shared in tx.linked_resources(set, ResourceKind::Network, id).await? {
        networks.push(Network {
            network_id: Some(shared.id),
            annotations: annotations_of(tx, annotated, AnnotationOwner::Network(shared.id))
                .await?,
            address: shared.key,
            comment: shared.comment,
        });
    }

    let mut fqdns = Vec::new();
    for shared in tx.linked_resources(set, ResourceKind::Fqdn, id).await? {
        fqdns.push(Fqdn {
            fqdn_id: Some(shared.id),
            annotations: annotations_of(tx, annotated, AnnotationOwner::Fqdn(shared.id)).await?,
            fqdn: shared.key,
            comment: shared.comment,
        });
    }

    Ok(Some(Organisation {
        organisation_id: Some(id),
        name: Some(row.name),
        sector_id: row.sector_id,
        comment: Some(row.comment),
        ripe_org_hdl: Some(row.ripe_org_hdl),
        ti_handle: Some(row.ti_handle),
        first_handle: Some(row.first_handle),
        annotations,
        asns,
        contacts,
        national_certs,
        networks,
        fqdns,
    }))
}

async fn annotations_of(
    tx: &mut dyn StoreTx,
    annotated: bool,
    owner: AnnotationOwner,
) -> StoreResult<Vec<Annotation>> {
    if annotated {
        tx.annotations(owner).await
    } else {
        Ok(Vec::new())
    }
}

/// ASN number details, or `None` when no organisation links the number.
pub async fn load_asn(tx: &mut dyn StoreTx, asn: i64) -> StoreResult<Option<AsnDetails>> {
    let organisation_ids = tx.asn_organisations(asn).await?;
    if organisation_ids.is_empty() {
        return Ok(None);
    }
    let annotations = tx.annotations(AnnotationOwner::Asn(asn)).await?;
    Ok(Some(AsnDetails {
        asn,
        organisation_ids,
        annotations,
    }))
}

fn validated_row(org: &Organisation) -> Result<OrganisationRow, CommitError> {
    let row = org.row();
    if row.name.is_empty() {
        return Err(CommitError::EmptyName);
    }
    Ok(row)
}

/// Inserts a new organisation with all of its children and returns its id.
///
/// Organisations are never deduplicated: two creates with identical payloads yield two rows.
pub async fn create(session: &mut Session<'_>, org: &Organisation) -> EngineResult<i64> {
    let row = validated_row(org)?;
    let networks = desired_networks(&org.networks)?;
    let fqdns = desired_fqdns(&org.fqdns);

    let id = session.tx.insert_organisation(&row).await?;
    reconcile_annotations(
        session,
        AnnotationOwner::Organisation(id),
        &row.name,
        &org.annotations,
        AnnotationMode::Add,
    )
    .await?;
    sync_asns(session, id, &org.asns).await?;
    sync_leaves(&mut *session.tx, id, &org.contacts).await?;
    sync_leaves(&mut *session.tx, id, &org.national_certs).await?;
    sync_resources(session, ResourceKind::Network, id, &networks).await?;
    sync_resources(session, ResourceKind::Fqdn, id, &fqdns).await?;

    tracing::debug!(org_id = id, name = %row.name, "created organisation");
    Ok(id)
}

/// Converges a stored organisation to `org` and returns its id.
///
/// The organisation's own columns are written last, after all linked entities.
pub async fn update(session: &mut Session<'_>, org: &Organisation) -> EngineResult<i64> {
    let id = org.organisation_id.ok_or(CommitError::MissingId {
        operation: "update",
    })?;
    if session.tx.organisation_row(TableSet::Manual, id).await?.is_none() {
        return Err(CommitError::UpdateTargetMissing { id }.into());
    }
    let row = validated_row(org)?;
    let networks = desired_networks(&org.networks)?;
    let fqdns = desired_fqdns(&org.fqdns);

    reconcile_annotations(
        session,
        AnnotationOwner::Organisation(id),
        &row.name,
        &org.annotations,
        AnnotationMode::Cut,
    )
    .await?;
    sync_asns(session, id, &org.asns).await?;
    sync_leaves(&mut *session.tx, id, &org.contacts).await?;
    sync_leaves(&mut *session.tx, id, &org.national_certs).await?;
    // Linked networks and fqdns are re-read inside `sync_resources`, after the steps above.
    sync_resources(session, ResourceKind::Network, id, &networks).await?;
    sync_resources(session, ResourceKind::Fqdn, id, &fqdns).await?;
    session.tx.update_organisation(id, &row).await?;

    tracing::debug!(org_id = id, name = %row.name, "updated organisation");
    Ok(id)
}

/// Deletes an organisation whose stored state still matches `org`.
///
/// Returns the id only when exactly one organisation row was removed.
pub async fn delete(session: &mut Session<'_>, org: &Organisation) -> EngineResult<Option<i64>> {
    let id = org.organisation_id.ok_or(CommitError::MissingId {
        operation: "delete",
    })?;
    let stored = load_organisation(&mut *session.tx, TableSet::Manual, id).await?;
    let Some(stored) = stored else {
        return Err(CommitError::DeleteTargetMissing { id }.into());
    };
    if stored.normalized() != org.normalized() {
        tracing::debug!(org_id = id, ?stored, supplied = ?org, "delete target differs");
        return Err(CommitError::StaleDelete { id }.into());
    }
    let name = stored.name.unwrap_or_default();

    reconcile_annotations(
        session,
        AnnotationOwner::Organisation(id),
        &name,
        &[],
        AnnotationMode::Cut,
    )
    .await?;
    sync_asns(session, id, &[]).await?;
    sync_leaves::<Contact>(&mut *session.tx, id, &[]).await?;
    sync_leaves::<NationalCert>(&mut *session.tx, id, &[]).await?;
    sync_resources(session, ResourceKind::Network, id, &[]).await?;
    sync_resources(session, ResourceKind::Fqdn, id, &[]).await?;

    let deleted = session.tx.delete_organisation(id).await?;
    tracing::debug!(org_id = id, deleted, "deleted organisation");
    Ok((deleted == 1).then_some(id))
}
