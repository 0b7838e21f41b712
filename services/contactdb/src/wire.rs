//! Wire-format validation for organisation aggregates.
//!
//! # Purpose
//! Checks a raw JSON aggregate against the versioned wire schema before it is turned into
//! typed model values. Every violated instance path is reported, not just the first one.
//!
//! # Notes
//! The schema is structural only. Business rules such as a non-empty name or mandatory
//! contact fields are enforced by the engine, which reports them as commit errors.
//!
//! Every scalar column and every child collection must be present. A scalar may be an explicit
//! `null` (stored as `""`), a collection may not: an update replaces child collections
//! wholesale, so a missing key must never read as "no children".
use crate::engine::error::{EngineError, FieldViolation};
use crate::model::Organisation;
use jsonschema::{Draft, JSONSchema};
use serde_json::{Value, json};
use std::sync::OnceLock;

pub const SCHEMA_VERSION: &str = "contactdb/organisation/v1";

static COMPILED: OnceLock<Result<JSONSchema, String>> = OnceLock::new();

fn annotations_schema(collection_type: Value) -> Value {
    json!({
        "type": collection_type,
        "items": {
            "type": "object",
            "required": ["tag"],
            "properties": {
                "tag": {"type": "string", "minLength": 1},
                "expires": {"type": ["string", "null"]},
                "condition": {
                    "type": ["array", "null"],
                    "minItems": 3,
                    "maxItems": 3,
                    "items": [
                        {"type": "string"},
                        {
                            "type": "array",
                            "minItems": 2,
                            "maxItems": 2,
                            "items": {"type": "string"}
                        },
                        {}
                    ]
                }
            }
        }
    })
}

fn optional_string() -> Value {
    json!({"type": ["string", "null"]})
}

fn optional_id() -> Value {
    json!({"type": ["integer", "null"]})
}

/// JSON Schema (draft 7) of one organisation aggregate.
pub fn organisation_schema() -> Value {
    let annotations = annotations_schema(json!(["array", "null"]));
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": [
            "name", "comment", "ripe_org_hdl", "ti_handle", "first_handle",
            "annotations", "asns", "contacts", "networks", "fqdns"
        ],
        "anyOf": [
            {"required": ["national_certs"]},
            {"required": ["nationalcerts"]}
        ],
        "properties": {
            "organisation_id": optional_id(),
            "name": optional_string(),
            "sector_id": {"type": ["integer", "string", "null"]},
            "comment": optional_string(),
            "ripe_org_hdl": optional_string(),
            "ti_handle": optional_string(),
            "first_handle": optional_string(),
            "annotations": annotations_schema(json!("array")),
            "asns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["asn"],
                    "properties": {
                        "asn": {"type": "integer", "minimum": 0, "maximum": 4294967295u64},
                        "annotations": annotations
                    }
                }
            },
            "contacts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "contact_id": optional_id(),
                        "firstname": optional_string(),
                        "lastname": optional_string(),
                        "tel": optional_string(),
                        "openpgp_fpr": optional_string(),
                        "email": optional_string(),
                        "comment": optional_string()
                    }
                }
            },
            "national_certs": national_certs_schema(),
            "nationalcerts": national_certs_schema(),
            "networks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["address"],
                    "properties": {
                        "network_id": optional_id(),
                        "address": {"type": "string", "minLength": 1},
                        "comment": optional_string(),
                        "annotations": annotations
                    }
                }
            },
            "fqdns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["fqdn"],
                    "properties": {
                        "fqdn_id": optional_id(),
                        "fqdn": {"type": "string", "minLength": 1},
                        "comment": optional_string(),
                        "annotations": annotations
                    }
                }
            }
        }
    })
}

fn national_certs_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "national_cert_id": optional_id(),
                "country_code": optional_string(),
                "comment": optional_string()
            }
        }
    })
}

fn compiled() -> &'static Result<JSONSchema, String> {
    COMPILED.get_or_init(|| {
        let schema = organisation_schema();
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|err| err.to_string())
    })
}

/// Validates `value` against [`organisation_schema`].
///
/// # Errors
/// Returns one [`FieldViolation`] per violated instance path, in schema evaluation order.
pub fn validate_organisation(value: &Value) -> Result<(), Vec<FieldViolation>> {
    let schema = match compiled() {
        Ok(schema) => schema,
        Err(err) => {
            tracing::error!(error = %err, "organisation schema failed to compile");
            return Err(vec![FieldViolation {
                path: String::new(),
                message: format!("schema {SCHEMA_VERSION} unavailable"),
            }]);
        }
    };
    match schema.validate(value) {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors
            .map(|err| FieldViolation {
                path: err.instance_path.to_string(),
                message: err.to_string(),
            })
            .collect()),
    }
}

/// Validates and deserializes one aggregate.
pub fn parse_organisation(value: Value) -> Result<Organisation, EngineError> {
    validate_organisation(&value).map_err(EngineError::Validation)?;
    serde_json::from_value(value).map_err(|err| {
        EngineError::Validation(vec![FieldViolation {
            path: String::new(),
            message: err.to_string(),
        }])
    })
}
