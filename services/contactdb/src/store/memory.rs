//! In-memory implementation of the contact store.
//!
//! # Purpose
//! Keeps the whole relational state in ordered maps behind one `tokio::sync::Mutex`. It exists
//! for local development and for the test-suite; nothing survives a restart.
//!
//! # Transactions
//! [`ContactStore::begin`] takes the mutex for the lifetime of the transaction and works on a
//! private copy of the state. `commit` swaps the copy in; `rollback` (or dropping the
//! transaction) throws it away. Transactions are therefore fully serialized, which is stricter
//! than the Postgres backend but observably equivalent for a single writer.
//!
//! # Referential checks
//! The checks mirror the foreign keys of the SQL schema so that engine bugs surface the same
//! way on both backends: linking to a missing organisation is `NotFound`, a duplicate link is
//! `Conflict`, deleting a still-referenced organisation is `Conflict`.
//!
//! # Automatic tables
//! Imported entries live in a second set of tables that transactions can read but not write.
//! [`InMemoryStore::import_automatic`] plays the part of the external importer.
use super::{
    AnnotationOwner, ContactStore, LeafKind, LeafRow, ResourceKind, SharedRow, StoreError,
    StoreResult, StoreTx, TableSet,
};
use crate::model::{Annotation, AuditLogEntry, Organisation, OrganisationRow};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone)]
struct StoredLeaf {
    kind: LeafKind,
    org_id: i64,
    values: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredResource {
    key: String,
    comment: String,
}

/// Rows of one table family.
#[derive(Debug, Clone, Default)]
struct Tables {
    organisations: BTreeMap<i64, OrganisationRow>,
    // (org_id, asn)
    asn_links: BTreeSet<(i64, i64)>,
    leaves: BTreeMap<i64, StoredLeaf>,
    resources: BTreeMap<(ResourceKind, i64), StoredResource>,
    // (kind, org_id, resource id)
    resource_links: BTreeSet<(ResourceKind, i64, i64)>,
}

impl Tables {
    fn linked_asns(&self, org_id: i64) -> Vec<i64> {
        self.asn_links
            .iter()
            .filter(|(org, _)| *org == org_id)
            .map(|(_, asn)| *asn)
            .collect()
    }

    fn leaves(&self, kind: LeafKind, org_id: i64) -> Vec<LeafRow> {
        self.leaves
            .iter()
            .filter(|(_, leaf)| leaf.kind == kind && leaf.org_id == org_id)
            .map(|(id, leaf)| LeafRow {
                id: *id,
                values: leaf.values.clone(),
            })
            .collect()
    }

    fn linked_resources(&self, kind: ResourceKind, org_id: i64) -> Vec<SharedRow> {
        self.resource_links
            .iter()
            .filter(|(linked_kind, org, _)| *linked_kind == kind && *org == org_id)
            .filter_map(|(_, _, id)| {
                self.resources.get(&(kind, *id)).map(|resource| SharedRow {
                    id: *id,
                    key: resource.key.clone(),
                    comment: resource.comment.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    manual: Tables,
    automatic: Tables,
    annotations: BTreeMap<AnnotationOwner, Vec<Annotation>>,
    audit: Vec<AuditLogEntry>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tables(&self, set: TableSet) -> &Tables {
        match set {
            TableSet::Manual => &self.manual,
            TableSet::Automatic => &self.automatic,
        }
    }

    fn ensure_organisation(&self, org_id: i64) -> StoreResult<()> {
        if self.manual.organisations.contains_key(&org_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("organisation {org_id}")))
        }
    }

    fn organisation_referenced(&self, org_id: i64) -> bool {
        let manual = &self.manual;
        manual.asn_links.iter().any(|(org, _)| *org == org_id)
            || manual.resource_links.iter().any(|(_, org, _)| *org == org_id)
            || manual.leaves.values().any(|leaf| leaf.org_id == org_id)
            || self
                .annotations
                .get(&AnnotationOwner::Organisation(org_id))
                .is_some_and(|items| !items.is_empty())
    }

    fn owner_exists(&self, owner: AnnotationOwner) -> bool {
        let manual = &self.manual;
        match owner {
            AnnotationOwner::Organisation(id) => manual.organisations.contains_key(&id),
            AnnotationOwner::Asn(_) => true,
            AnnotationOwner::Network(id) => {
                manual.resources.contains_key(&(ResourceKind::Network, id))
            }
            AnnotationOwner::Fqdn(id) => manual.resources.contains_key(&(ResourceKind::Fqdn, id)),
        }
    }
}

/// Non-durable store for development and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed audit entries, oldest first.
    pub async fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit.clone()
    }

    /// Committed manual resources of one kind as `(id, key)` pairs, ordered by id.
    pub async fn resources(&self, kind: ResourceKind) -> Vec<(i64, String)> {
        self.state
            .lock()
            .await
            .manual
            .resources
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|((_, id), resource)| (*id, resource.key.clone()))
            .collect()
    }

    pub async fn organisation_count(&self) -> usize {
        self.state.lock().await.manual.organisations.len()
    }

    /// Committed annotations of one owner, in insertion order.
    pub async fn stored_annotations(&self, owner: AnnotationOwner) -> Vec<Annotation> {
        self.state
            .lock()
            .await
            .annotations
            .get(&owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Writes `org` into the automatic tables and returns its new id.
    ///
    /// Annotations are ignored, and every network and fqdn gets a fresh row.
    pub async fn import_automatic(&self, org: &Organisation) -> i64 {
        let mut state = self.state.lock().await;
        let org_id = state.allocate_id();
        state.automatic.organisations.insert(org_id, org.row());
        for link in &org.asns {
            state.automatic.asn_links.insert((org_id, link.asn));
        }

        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let mut leaves: Vec<(LeafKind, Vec<String>)> = Vec::new();
        for contact in &org.contacts {
            leaves.push((
                LeafKind::Contact,
                vec![
                    text(&contact.firstname),
                    text(&contact.lastname),
                    text(&contact.tel),
                    text(&contact.openpgp_fpr),
                    text(&contact.email),
                    text(&contact.comment),
                ],
            ));
        }
        for cert in &org.national_certs {
            leaves.push((
                LeafKind::NationalCert,
                vec![text(&cert.country_code), text(&cert.comment)],
            ));
        }
        for (kind, values) in leaves {
            let id = state.allocate_id();
            state.automatic.leaves.insert(
                id,
                StoredLeaf {
                    kind,
                    org_id,
                    values,
                },
            );
        }

        let resources = org
            .networks
            .iter()
            .map(|network| (ResourceKind::Network, &network.address, &network.comment))
            .chain(
                org.fqdns
                    .iter()
                    .map(|fqdn| (ResourceKind::Fqdn, &fqdn.fqdn, &fqdn.comment)),
            );
        for (kind, key, comment) in resources {
            let id = state.allocate_id();
            state.automatic.resources.insert(
                (kind, id),
                StoredResource {
                    key: key.clone(),
                    comment: comment.clone(),
                },
            );
            state.automatic.resource_links.insert((kind, org_id, id));
        }
        org_id
    }
}

#[async_trait]
impl ContactStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_organisation(&mut self, row: &OrganisationRow) -> StoreResult<i64> {
        let id = self.working.allocate_id();
        self.working.manual.organisations.insert(id, row.clone());
        Ok(id)
    }

    async fn update_organisation(&mut self, id: i64, row: &OrganisationRow) -> StoreResult<u64> {
        match self.working.manual.organisations.get_mut(&id) {
            Some(stored) => {
                *stored = row.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_organisation(&mut self, id: i64) -> StoreResult<u64> {
        if !self.working.manual.organisations.contains_key(&id) {
            return Ok(0);
        }
        if self.working.organisation_referenced(id) {
            return Err(StoreError::Conflict(format!(
                "organisation {id} is still referenced"
            )));
        }
        self.working.manual.organisations.remove(&id);
        self.working
            .annotations
            .remove(&AnnotationOwner::Organisation(id));
        Ok(1)
    }

    async fn organisation_row(
        &mut self,
        set: TableSet,
        id: i64,
    ) -> StoreResult<Option<OrganisationRow>> {
        Ok(self.working.tables(set).organisations.get(&id).cloned())
    }

    async fn annotations(&mut self, owner: AnnotationOwner) -> StoreResult<Vec<Annotation>> {
        Ok(self
            .working
            .annotations
            .get(&owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<()> {
        if !self.working.owner_exists(owner) {
            return Err(StoreError::NotFound(format!(
                "{} {}",
                owner.object_type(),
                owner.key()
            )));
        }
        self.working
            .annotations
            .entry(owner)
            .or_default()
            .push(annotation.clone());
        Ok(())
    }

    async fn delete_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<u64> {
        let Some(items) = self.working.annotations.get_mut(&owner) else {
            return Ok(0);
        };
        let before = items.len();
        items.retain(|stored| stored != annotation);
        let removed = (before - items.len()) as u64;
        if items.is_empty() {
            self.working.annotations.remove(&owner);
        }
        Ok(removed)
    }

    async fn linked_asns(&mut self, set: TableSet, org_id: i64) -> StoreResult<Vec<i64>> {
        Ok(self.working.tables(set).linked_asns(org_id))
    }

    async fn asn_organisations(&mut self, asn: i64) -> StoreResult<Vec<i64>> {
        let mut orgs: Vec<i64> = self
            .working
            .manual
            .asn_links
            .iter()
            .filter(|(_, linked)| *linked == asn)
            .map(|(org, _)| *org)
            .collect();
        orgs.sort_unstable();
        Ok(orgs)
    }

    async fn link_asn(&mut self, org_id: i64, asn: i64) -> StoreResult<()> {
        self.working.ensure_organisation(org_id)?;
        if !self.working.manual.asn_links.insert((org_id, asn)) {
            return Err(StoreError::Conflict(format!(
                "asn {asn} already linked to organisation {org_id}"
            )));
        }
        Ok(())
    }

    async fn unlink_asns_except(&mut self, org_id: i64, keep: &[i64]) -> StoreResult<u64> {
        let links = &mut self.working.manual.asn_links;
        let before = links.len();
        links.retain(|(org, asn)| *org != org_id || keep.contains(asn));
        Ok((before - links.len()) as u64)
    }

    async fn prune_asn_annotations(&mut self) -> StoreResult<u64> {
        let linked: BTreeSet<i64> = self
            .working
            .manual
            .asn_links
            .iter()
            .map(|(_, asn)| *asn)
            .collect();
        let mut removed = 0u64;
        self.working.annotations.retain(|owner, items| match owner {
            AnnotationOwner::Asn(asn) if !linked.contains(asn) => {
                removed += items.len() as u64;
                false
            }
            _ => true,
        });
        Ok(removed)
    }

    async fn leaves(
        &mut self,
        set: TableSet,
        kind: LeafKind,
        org_id: i64,
    ) -> StoreResult<Vec<LeafRow>> {
        Ok(self.working.tables(set).leaves(kind, org_id))
    }

    async fn delete_leaves(&mut self, kind: LeafKind, org_id: i64) -> StoreResult<u64> {
        let leaves = &mut self.working.manual.leaves;
        let before = leaves.len();
        leaves.retain(|_, leaf| leaf.kind != kind || leaf.org_id != org_id);
        Ok((before - leaves.len()) as u64)
    }

    async fn insert_leaf(
        &mut self,
        kind: LeafKind,
        org_id: i64,
        values: &[String],
    ) -> StoreResult<i64> {
        self.working.ensure_organisation(org_id)?;
        if values.len() != kind.fields().len() {
            return Err(StoreError::Unexpected(anyhow::anyhow!(
                "{} expects {} values, got {}",
                kind.table(),
                kind.fields().len(),
                values.len()
            )));
        }
        let id = self.working.allocate_id();
        self.working.manual.leaves.insert(
            id,
            StoredLeaf {
                kind,
                org_id,
                values: values.to_vec(),
            },
        );
        Ok(id)
    }

    async fn linked_resources(
        &mut self,
        set: TableSet,
        kind: ResourceKind,
        org_id: i64,
    ) -> StoreResult<Vec<SharedRow>> {
        Ok(self.working.tables(set).linked_resources(kind, org_id))
    }

    async fn find_resource(
        &mut self,
        kind: ResourceKind,
        key: &str,
    ) -> StoreResult<Option<SharedRow>> {
        Ok(self
            .working
            .manual
            .resources
            .iter()
            .find(|((stored_kind, _), resource)| *stored_kind == kind && resource.key == key)
            .map(|((_, id), resource)| SharedRow {
                id: *id,
                key: resource.key.clone(),
                comment: resource.comment.clone(),
            }))
    }

    async fn insert_resource(
        &mut self,
        kind: ResourceKind,
        key: &str,
        comment: &str,
    ) -> StoreResult<i64> {
        let id = self.working.allocate_id();
        self.working.manual.resources.insert(
            (kind, id),
            StoredResource {
                key: key.to_string(),
                comment: comment.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_resource_comment(
        &mut self,
        kind: ResourceKind,
        id: i64,
        comment: &str,
    ) -> StoreResult<u64> {
        match self.working.manual.resources.get_mut(&(kind, id)) {
            Some(resource) => {
                resource.comment = comment.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn link_resource(
        &mut self,
        kind: ResourceKind,
        org_id: i64,
        id: i64,
    ) -> StoreResult<()> {
        self.working.ensure_organisation(org_id)?;
        if !self.working.manual.resources.contains_key(&(kind, id)) {
            return Err(StoreError::NotFound(format!("{} {id}", kind.table())));
        }
        if !self.working.manual.resource_links.insert((kind, org_id, id)) {
            return Err(StoreError::Conflict(format!(
                "{} {id} already linked to organisation {org_id}",
                kind.table()
            )));
        }
        Ok(())
    }

    async fn unlink_resource(
        &mut self,
        kind: ResourceKind,
        org_id: i64,
        id: i64,
    ) -> StoreResult<u64> {
        Ok(u64::from(
            self.working.manual.resource_links.remove(&(kind, org_id, id)),
        ))
    }

    async fn prune_resources(&mut self, kind: ResourceKind) -> StoreResult<u64> {
        let manual = &mut self.working.manual;
        let linked: BTreeSet<i64> = manual
            .resource_links
            .iter()
            .filter(|(linked_kind, _, _)| *linked_kind == kind)
            .map(|(_, _, id)| *id)
            .collect();
        let orphans: Vec<i64> = manual
            .resources
            .keys()
            .filter(|(stored_kind, id)| *stored_kind == kind && !linked.contains(id))
            .map(|(_, id)| *id)
            .collect();
        for id in &orphans {
            manual.resources.remove(&(kind, *id));
            self.working.annotations.remove(&kind.annotation_owner(*id));
        }
        Ok(orphans.len() as u64)
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.working.audit.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
