//! Annotation value type.
//!
//! # Purpose
//! Annotations are free-form policy markers attached to an organisation, an ASN number, a
//! network or an fqdn. They carry no surrogate id: identity is the full structural value.
//!
//! # Key invariants
//! - `expires: Some("")` means "never expires" and is distinct from `expires: None`
//!   (absent) everywhere except the delete staleness check (see [`Annotation::normalized`]).
//! - Ordering is the canonical `(tag, expires, condition)` key so that set operations over
//!   annotations are deterministic regardless of input order.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Reference to an event field, serialized as `[kind, name]` (e.g. `["event_field", "source.ip"]`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef(pub String, pub String);

impl FieldRef {
    pub fn event_field(name: impl Into<String>) -> Self {
        Self("event_field".to_string(), name.into())
    }
}

/// Structured annotation condition, serialized as `[operator, field_ref, literal]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition(pub String, pub FieldRef, pub Value);

impl Condition {
    pub fn new(operator: impl Into<String>, field: FieldRef, literal: Value) -> Self {
        Self(operator.into(), field, literal)
    }

    pub fn operator(&self) -> &str {
        &self.0
    }

    pub fn field(&self) -> &FieldRef {
        &self.1
    }

    pub fn literal(&self) -> &Value {
        &self.2
    }

    // serde_json maps are key-sorted, so the rendering is independent of the order in
    // which object fields arrived on the wire.
    fn sort_key(&self) -> (&str, &FieldRef, String) {
        (&self.0, &self.1, self.2.to_string())
    }
}

impl PartialOrd for Condition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Condition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl Annotation {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            condition: None,
            expires: None,
        }
    }

    pub fn with_expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// True when both annotations are equal except for their `expires` field.
    pub fn same_except_expiry(&self, other: &Self) -> bool {
        self.tag == other.tag && self.condition == other.condition
    }

    /// Folds `expires: Some("")` into `expires: None`.
    ///
    /// Only used when comparing caller-supplied state against stored state, where a
    /// read/write round trip may have dropped an empty expiry.
    pub fn normalized(&self) -> Self {
        let mut annotation = self.clone();
        if annotation.expires.as_deref() == Some("") {
            annotation.expires = None;
        }
        annotation
    }

    fn sort_key(&self) -> (&str, Option<&str>, Option<&Condition>) {
        (&self.tag, self.expires.as_deref(), self.condition.as_ref())
    }
}

impl PartialOrd for Annotation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Annotation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
