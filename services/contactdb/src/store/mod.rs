//! Storage collaborator for the reconciliation engine.
//!
//! # Purpose
//! Defines the transactional store contract: a [`ContactStore`] hands out [`StoreTx`]
//! transactions exposing typed primitive statements. The engine sequences these primitives;
//! backends only persist them.
//!
//! # Notes
//! Every `StoreTx` call runs inside the transaction it belongs to. Dropping a transaction
//! without calling [`StoreTx::commit`] discards its effects.
use crate::model::{Annotation, AuditLogEntry, OrganisationRow};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[cfg(all(test, feature = "pg-tests"))]
mod postgres_tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("no healthy connection after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Family of tables a read goes to.
///
/// Manual tables are curated through the engine. Automatic tables (`organisation_automatic`,
/// `contact_automatic`, ...) are filled by external importers and are only ever read here; they
/// carry no annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableSet {
    Manual,
    Automatic,
}

impl TableSet {
    /// Name of `base` in this family, e.g. `network_automatic`.
    pub fn table(&self, base: &str) -> String {
        match self {
            TableSet::Manual => base.to_string(),
            TableSet::Automatic => format!("{base}_automatic"),
        }
    }

    /// Surrogate key column of `base` in this family, e.g. `network_automatic_id`.
    pub fn id_column(&self, base: &str) -> String {
        format!("{}_id", self.table(base))
    }
}

/// Object an annotation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationOwner {
    Organisation(i64),
    Asn(i64),
    Network(i64),
    Fqdn(i64),
}

impl AnnotationOwner {
    pub fn table(&self) -> &'static str {
        match self {
            AnnotationOwner::Organisation(_) => "organisation_annotation",
            AnnotationOwner::Asn(_) => "autonomous_system_annotation",
            AnnotationOwner::Network(_) => "network_annotation",
            AnnotationOwner::Fqdn(_) => "fqdn_annotation",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            AnnotationOwner::Organisation(_) => "organisation_id",
            AnnotationOwner::Asn(_) => "asn",
            AnnotationOwner::Network(_) => "network_id",
            AnnotationOwner::Fqdn(_) => "fqdn_id",
        }
    }

    pub fn object_type(&self) -> &'static str {
        match self {
            AnnotationOwner::Organisation(_) => "organisation",
            AnnotationOwner::Asn(_) => "autonomous_system",
            AnnotationOwner::Network(_) => "network",
            AnnotationOwner::Fqdn(_) => "fqdn",
        }
    }

    pub fn key(&self) -> i64 {
        match *self {
            AnnotationOwner::Organisation(id)
            | AnnotationOwner::Asn(id)
            | AnnotationOwner::Network(id)
            | AnnotationOwner::Fqdn(id) => id,
        }
    }
}

/// Entities exclusively owned by one organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeafKind {
    Contact,
    NationalCert,
}

impl LeafKind {
    pub fn table(&self) -> &'static str {
        match self {
            LeafKind::Contact => "contact",
            LeafKind::NationalCert => "national_cert",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            LeafKind::Contact => "contact_id",
            LeafKind::NationalCert => "national_cert_id",
        }
    }

    /// Mandatory columns, in storage order.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            LeafKind::Contact => &[
                "firstname",
                "lastname",
                "tel",
                "openpgp_fpr",
                "email",
                "comment",
            ],
            LeafKind::NationalCert => &["country_code", "comment"],
        }
    }
}

/// A stored leaf; `values` follow [`LeafKind::fields`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRow {
    pub id: i64,
    pub values: Vec<String>,
}

/// Entities shared between organisations through a join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Network,
    Fqdn,
}

impl ResourceKind {
    pub fn table(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Fqdn => "fqdn",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network_id",
            ResourceKind::Fqdn => "fqdn_id",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            ResourceKind::Network => "address",
            ResourceKind::Fqdn => "fqdn",
        }
    }

    pub fn join_table(&self) -> &'static str {
        match self {
            ResourceKind::Network => "organisation_to_network",
            ResourceKind::Fqdn => "organisation_to_fqdn",
        }
    }

    pub fn annotation_owner(&self, id: i64) -> AnnotationOwner {
        match self {
            ResourceKind::Network => AnnotationOwner::Network(id),
            ResourceKind::Fqdn => AnnotationOwner::Fqdn(id),
        }
    }
}

/// A stored shared resource row; `key` is the business key (address or domain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedRow {
    pub id: i64,
    pub key: String,
    pub comment: String,
}

/// Primitive statements available inside one transaction.
///
/// Writes always target the manual tables; reads taking a [`TableSet`] can also reach the
/// automatic ones.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_organisation(&mut self, row: &OrganisationRow) -> StoreResult<i64>;
    /// Returns the number of updated rows.
    async fn update_organisation(&mut self, id: i64, row: &OrganisationRow) -> StoreResult<u64>;
    /// Returns the number of deleted rows.
    async fn delete_organisation(&mut self, id: i64) -> StoreResult<u64>;
    async fn organisation_row(
        &mut self,
        set: TableSet,
        id: i64,
    ) -> StoreResult<Option<OrganisationRow>>;

    async fn annotations(&mut self, owner: AnnotationOwner) -> StoreResult<Vec<Annotation>>;
    async fn insert_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<()>;
    async fn delete_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<u64>;

    /// ASN numbers linked to the organisation, ascending.
    async fn linked_asns(&mut self, set: TableSet, org_id: i64) -> StoreResult<Vec<i64>>;
    /// Organisations linking the ASN number, ascending.
    async fn asn_organisations(&mut self, asn: i64) -> StoreResult<Vec<i64>>;
    async fn link_asn(&mut self, org_id: i64, asn: i64) -> StoreResult<()>;
    /// Removes every ASN link of the organisation whose number is not in `keep`.
    async fn unlink_asns_except(&mut self, org_id: i64, keep: &[i64]) -> StoreResult<u64>;
    /// Removes ASN annotations whose number is no longer linked by any organisation.
    async fn prune_asn_annotations(&mut self) -> StoreResult<u64>;

    async fn leaves(
        &mut self,
        set: TableSet,
        kind: LeafKind,
        org_id: i64,
    ) -> StoreResult<Vec<LeafRow>>;
    async fn delete_leaves(&mut self, kind: LeafKind, org_id: i64) -> StoreResult<u64>;
    async fn insert_leaf(
        &mut self,
        kind: LeafKind,
        org_id: i64,
        values: &[String],
    ) -> StoreResult<i64>;

    /// Resources linked to the organisation, ordered by id.
    async fn linked_resources(
        &mut self,
        set: TableSet,
        kind: ResourceKind,
        org_id: i64,
    ) -> StoreResult<Vec<SharedRow>>;
    /// Lowest-id resource with exactly this business key, linked or not.
    async fn find_resource(&mut self, kind: ResourceKind, key: &str)
    -> StoreResult<Option<SharedRow>>;
    async fn insert_resource(
        &mut self,
        kind: ResourceKind,
        key: &str,
        comment: &str,
    ) -> StoreResult<i64>;
    async fn update_resource_comment(
        &mut self,
        kind: ResourceKind,
        id: i64,
        comment: &str,
    ) -> StoreResult<u64>;
    async fn link_resource(&mut self, kind: ResourceKind, org_id: i64, id: i64)
    -> StoreResult<()>;
    async fn unlink_resource(
        &mut self,
        kind: ResourceKind,
        org_id: i64,
        id: i64,
    ) -> StoreResult<u64>;
    /// Deletes every resource of this kind no organisation links, with its annotations.
    async fn prune_resources(&mut self, kind: ResourceKind) -> StoreResult<u64>;

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
