//! Reconciliation of annotations and of resources shared between organisations.
//!
//! # Purpose
//! Applies annotation diffs to storage (writing audit entries), and converges an organisation's
//! ASN, network and fqdn links to a desired set: unlink what is gone, create or reuse what is
//! missing, update what stays, and prune rows nobody links anymore.
//!
//! # Key invariants
//! - Business keys are compared as exact strings. Network addresses are canonicalized to
//!   `network/prefix` before comparison; domains are not case-folded.
//! - Within one desired set the first occurrence of a business key wins; later duplicates are
//!   logged and dropped.
//! - Pruning is global: a network or fqdn is deleted once no organisation links it.
use crate::engine::Session;
use crate::engine::diff::{AnnotationDiff, AnnotationMode, diff_for_mode};
use crate::engine::error::{CommitError, EngineResult};
use crate::model::{Annotation, AsnLink, AuditLogEntry, AuditOperation, Fqdn, Network};
use crate::store::{AnnotationOwner, ResourceKind, SharedRow, TableSet};
use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Converges the annotations of `owner` to `desired` and audits the result.
///
/// `object_value` is the human readable key recorded in the audit log.
pub async fn reconcile_annotations(
    session: &mut Session<'_>,
    owner: AnnotationOwner,
    object_value: &str,
    desired: &[Annotation],
    mode: AnnotationMode,
) -> EngineResult<AnnotationDiff> {
    let current = session.tx.annotations(owner).await?;
    let diff = diff_for_mode(&current, desired, mode);
    if diff.is_empty() {
        return Ok(diff);
    }

    for item in &diff.remove {
        session.tx.delete_annotation(owner, &item.annotation).await?;
        if item.log {
            audit(
                session,
                owner,
                object_value,
                AuditOperation::Remove,
                Some(&item.annotation),
                None,
            )
            .await?;
        }
    }
    for item in &diff.add {
        session.tx.insert_annotation(owner, &item.annotation).await?;
        if item.log {
            audit(
                session,
                owner,
                object_value,
                AuditOperation::Add,
                None,
                Some(&item.annotation),
            )
            .await?;
        }
    }
    for change in &diff.change {
        audit(
            session,
            owner,
            object_value,
            AuditOperation::Change,
            Some(&change.before),
            Some(&change.after),
        )
        .await?;
    }

    record_annotation_metrics(&diff);
    Ok(diff)
}

async fn audit(
    session: &mut Session<'_>,
    owner: AnnotationOwner,
    object_value: &str,
    operation: AuditOperation,
    before: Option<&Annotation>,
    after: Option<&Annotation>,
) -> EngineResult<()> {
    let entry = AuditLogEntry {
        table: owner.table().to_string(),
        user: session.user.to_string(),
        operation,
        object_type: owner.object_type().to_string(),
        object_value: object_value.to_string(),
        before: before.cloned(),
        after: after.cloned(),
    };
    session.tx.append_audit(&entry).await?;
    Ok(())
}

fn record_annotation_metrics(diff: &AnnotationDiff) {
    let adds = diff.add.iter().filter(|item| item.log).count() as u64;
    let removes = diff.remove.iter().filter(|item| item.log).count() as u64;
    metrics::counter!("contactdb_annotation_changes_total", "op" => "add").increment(adds);
    metrics::counter!("contactdb_annotation_changes_total", "op" => "remove").increment(removes);
    metrics::counter!("contactdb_annotation_changes_total", "op" => "change")
        .increment(diff.change.len() as u64);
}

/// Canonical `network/prefix` form of a CIDR address.
///
/// Addresses without a prefix are host routes. Host bits beyond the prefix are rejected, as the
/// `cidr` column type would reject them.
pub fn canonical_network(address: &str) -> Result<String, CommitError> {
    let invalid = |reason: String| CommitError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    let network = IpNetwork::from_str(address.trim()).map_err(|err| invalid(err.to_string()))?;
    if network.network() != network.ip() {
        return Err(invalid("host bits set beyond prefix".to_string()));
    }
    Ok(format!("{}/{}", network.network(), network.prefix()))
}

/// A desired shared resource, keyed by its canonical business key.
#[derive(Debug, Clone)]
pub struct DesiredResource<'a> {
    pub key: String,
    pub comment: &'a str,
    pub annotations: &'a [Annotation],
}

impl<'a> DesiredResource<'a> {
    pub fn from_network(network: &'a Network) -> Result<Self, CommitError> {
        Ok(Self {
            key: canonical_network(&network.address)?,
            comment: &network.comment,
            annotations: &network.annotations,
        })
    }

    pub fn from_fqdn(fqdn: &'a Fqdn) -> Self {
        Self {
            key: fqdn.fqdn.clone(),
            comment: &fqdn.comment,
            annotations: &fqdn.annotations,
        }
    }
}

pub fn desired_networks(networks: &[Network]) -> Result<Vec<DesiredResource<'_>>, CommitError> {
    networks.iter().map(DesiredResource::from_network).collect()
}

pub fn desired_fqdns(fqdns: &[Fqdn]) -> Vec<DesiredResource<'_>> {
    fqdns.iter().map(DesiredResource::from_fqdn).collect()
}

/// Drops later occurrences of an already seen key, logging each one.
fn first_occurrences<'d, T>(
    items: &'d [T],
    kind: &'static str,
    key: impl Fn(&T) -> String,
) -> Vec<&'d T> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| {
            let key = key(*item);
            let first = seen.insert(key.clone());
            if !first {
                // TODO: reject duplicate business keys once clients stop sending them.
                tracing::warn!(kind, key = %key, "discarding duplicate entry in desired set");
            }
            first
        })
        .collect()
}

/// Converges the links of `org_id` to one shared resource kind.
pub async fn sync_resources(
    session: &mut Session<'_>,
    kind: ResourceKind,
    org_id: i64,
    desired: &[DesiredResource<'_>],
) -> EngineResult<()> {
    let current = session
        .tx
        .linked_resources(TableSet::Manual, kind, org_id)
        .await?;
    let desired = first_occurrences(desired, kind.table(), |item| item.key.clone());
    let desired_keys: BTreeSet<&str> = desired.iter().map(|item| item.key.as_str()).collect();
    let current_keys: BTreeSet<&str> = current.iter().map(|row| row.key.as_str()).collect();

    for row in current.iter().filter(|row| !desired_keys.contains(row.key.as_str())) {
        reconcile_annotations(
            session,
            kind.annotation_owner(row.id),
            &row.key,
            &[],
            AnnotationMode::Cut,
        )
        .await?;
        session.tx.unlink_resource(kind, org_id, row.id).await?;
    }

    for item in desired
        .iter()
        .filter(|item| !current_keys.contains(item.key.as_str()))
    {
        // A reused row may be linked by other organisations; its comment stays as stored.
        let id = match session.tx.find_resource(kind, &item.key).await? {
            Some(existing) => existing.id,
            None => {
                session
                    .tx
                    .insert_resource(kind, &item.key, item.comment)
                    .await?
            }
        };
        reconcile_annotations(
            session,
            kind.annotation_owner(id),
            &item.key,
            item.annotations,
            AnnotationMode::Add,
        )
        .await?;
        session.tx.link_resource(kind, org_id, id).await?;
    }

    for row in current.iter() {
        let Some(item) = desired.iter().find(|item| item.key == row.key) else {
            continue;
        };
        update_comment(session, kind, row, item.comment).await?;
        reconcile_annotations(
            session,
            kind.annotation_owner(row.id),
            &row.key,
            item.annotations,
            AnnotationMode::Cut,
        )
        .await?;
    }

    let pruned = session.tx.prune_resources(kind).await?;
    if pruned > 0 {
        tracing::debug!(kind = kind.table(), pruned, "pruned unlinked resources");
        metrics::counter!("contactdb_pruned_resources_total", "kind" => kind.table())
            .increment(pruned);
    }
    Ok(())
}

async fn update_comment(
    session: &mut Session<'_>,
    kind: ResourceKind,
    row: &SharedRow,
    comment: &str,
) -> EngineResult<()> {
    if row.comment != comment {
        session
            .tx
            .update_resource_comment(kind, row.id, comment)
            .await?;
    }
    Ok(())
}

/// Converges the ASN links of `org_id` to `desired`.
///
/// Annotations of already linked numbers are cut to the desired set; newly linked numbers only
/// gain annotations, since other organisations may already link them. Annotations of numbers
/// this organisation was the last one to link are removed with audit entries before the bulk
/// unlink.
pub async fn sync_asns(
    session: &mut Session<'_>,
    org_id: i64,
    desired: &[AsnLink],
) -> EngineResult<()> {
    let linked: BTreeSet<i64> = session
        .tx
        .linked_asns(TableSet::Manual, org_id)
        .await?
        .into_iter()
        .collect();
    let desired = first_occurrences(desired, "autonomous_system", |link| link.asn.to_string());
    let keep: Vec<i64> = desired.iter().map(|link| link.asn).collect();

    for link in &desired {
        let owner = AnnotationOwner::Asn(link.asn);
        let label = link.asn.to_string();
        if linked.contains(&link.asn) {
            reconcile_annotations(session, owner, &label, &link.annotations, AnnotationMode::Cut)
                .await?;
        } else {
            reconcile_annotations(session, owner, &label, &link.annotations, AnnotationMode::Add)
                .await?;
            session.tx.link_asn(org_id, link.asn).await?;
        }
    }

    for asn in linked.iter().filter(|asn| !keep.contains(asn)) {
        let linking = session.tx.asn_organisations(*asn).await?;
        if linking.iter().all(|org| *org == org_id) {
            reconcile_annotations(
                session,
                AnnotationOwner::Asn(*asn),
                &asn.to_string(),
                &[],
                AnnotationMode::Cut,
            )
            .await?;
        }
    }

    session.tx.unlink_asns_except(org_id, &keep).await?;
    let pruned = session.tx.prune_asn_annotations().await?;
    if pruned > 0 {
        metrics::counter!("contactdb_pruned_resources_total", "kind" => "autonomous_system_annotation")
            .increment(pruned);
    }
    Ok(())
}
