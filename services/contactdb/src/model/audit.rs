//! Audit trail entries for annotation changes.
use crate::model::Annotation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Add,
    Remove,
    Change,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Add => "add",
            AuditOperation::Remove => "remove",
            AuditOperation::Change => "change",
        }
    }
}

/// One append-only audit record.
///
/// `object_value` is the human readable key of the annotated object (organisation name,
/// network address, domain or ASN number), not its surrogate id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub table: String,
    pub user: String,
    pub operation: AuditOperation,
    pub object_type: String,
    pub object_value: String,
    pub before: Option<Annotation>,
    pub after: Option<Annotation>,
}
