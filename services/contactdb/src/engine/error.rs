//! Engine error taxonomy.
//!
//! # Purpose
//! Separates caller-facing schema violations, business-rule violations and storage failures so
//! the batch executor can decide what a client is allowed to see.
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// One schema violation: the JSON pointer of the offending value and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

/// Business-rule violations detected while reconciling an aggregate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("{field} not set")]
    FieldNotSet { field: &'static str },
    #[error("Name of the organisation must be provided.")]
    EmptyName,
    #[error("organisation_id must be provided for {operation}")]
    MissingId { operation: &'static str },
    #[error("Org {id} to be updated not in db.")]
    UpdateTargetMissing { id: i64 },
    #[error("Org {id} to be deleted not in db.")]
    DeleteTargetMissing { id: i64 },
    #[error("Org {id} to be deleted differs from db entry.")]
    StaleDelete { id: i64 },
    #[error("invalid network address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("schema validation failed with {} violation(s)", .0.len())]
    Validation(Vec<FieldViolation>),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of a failed batch as reported to the client.
///
/// Commit failures deliberately carry no detail; it is logged instead.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{0}")]
    BadRequest(String),
    #[error("schema validation failed with {} violation(s)", .0.len())]
    Validation(Vec<FieldViolation>),
    #[error("Commit failed, see server logs.")]
    CommitFailed,
}
