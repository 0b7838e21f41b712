//! Contact database data model.
//!
//! # Purpose
//! Re-exports the organisation aggregate, annotation value type, audit entries and batch
//! command kinds used by the engine, store and API layers.
mod annotation;
mod audit;
mod command;
mod organisation;

pub use annotation::{Annotation, Condition, FieldRef};
pub use audit::{AuditLogEntry, AuditOperation};
pub use command::CommandKind;
pub use organisation::{
    AsnDetails, AsnLink, Contact, Fqdn, NationalCert, Network, Organisation, OrganisationRow,
};
