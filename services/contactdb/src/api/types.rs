//! HTTP payload shapes for the contact database API.
use crate::engine::error::FieldViolation;
use crate::model::CommandKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub backend: String,
    pub durable: bool,
}

/// Body of every 4xx/5xx response.
///
/// `violations` is only present for schema validation failures.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ErrorResponse {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

/// A batch of commands applied in one transaction.
///
/// Kept as raw JSON so that envelope errors can be reported with the service's own messages
/// instead of the extractor's.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CommitRequest {
    #[schema(value_type = Vec<CommandKind>)]
    pub commands: Value,
    #[schema(value_type = Vec<Object>)]
    pub orgs: Value,
}

/// One entry of a successful commit response, serialized as `[kind, id]`.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct CommitResult(pub CommandKind, pub Option<i64>);
