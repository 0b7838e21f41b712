//! Organisation aggregate and its child entities.
//!
//! # Purpose
//! Typed form of the aggregate clients submit and receive. Deserialization is lenient about
//! explicit `null`s so that the engine, not serde, decides which absences are business-rule
//! violations (missing contact fields, empty names).
use crate::model::Annotation;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// An autonomous system number linked to an organisation.
///
/// Annotations belong to the number itself and are shared by every linking organisation.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AsnLink {
    pub asn: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schema(value_type = Vec<Object>)]
    pub annotations: Vec<Annotation>,
}

#[derive(
    Debug, Serialize, Deserialize, ToSchema, Clone, Default, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<i64>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub tel: Option<String>,
    #[serde(default)]
    pub openpgp_fpr: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(
    Debug, Serialize, Deserialize, ToSchema, Clone, Default, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct NationalCert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_cert_id: Option<i64>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<i64>,
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schema(value_type = Vec<Object>)]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fqdn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn_id: Option<i64>,
    pub fqdn: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schema(value_type = Vec<Object>)]
    pub annotations: Vec<Annotation>,
}

/// Organisation aggregate root.
///
/// Scalar columns may be an explicit `null`, which is stored as an empty string, except for
/// `name`, which must be non-empty at create and update time. Presence of every column and
/// collection is checked by the wire schema, not here.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default, PartialEq, Eq)]
pub struct Organisation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "sector_id")]
    pub sector_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub ripe_org_hdl: Option<String>,
    #[serde(default)]
    pub ti_handle: Option<String>,
    #[serde(default)]
    pub first_handle: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schema(value_type = Vec<Object>)]
    pub annotations: Vec<Annotation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub asns: Vec<AsnLink>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contacts: Vec<Contact>,
    #[serde(default, alias = "nationalcerts", deserialize_with = "null_as_default")]
    pub national_certs: Vec<NationalCert>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub networks: Vec<Network>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fqdns: Vec<Fqdn>,
}

/// Scalar organisation columns as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrganisationRow {
    pub name: String,
    pub sector_id: Option<i64>,
    pub comment: String,
    pub ripe_org_hdl: String,
    pub ti_handle: String,
    pub first_handle: String,
}

impl Organisation {
    /// Scalar columns with `None` folded to the empty string.
    pub fn row(&self) -> OrganisationRow {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        OrganisationRow {
            name: text(&self.name),
            sector_id: self.sector_id,
            comment: text(&self.comment),
            ripe_org_hdl: text(&self.ripe_org_hdl),
            ti_handle: text(&self.ti_handle),
            first_handle: text(&self.first_handle),
        }
    }

    /// Canonical form used to compare a caller-supplied aggregate with stored state.
    ///
    /// Collections are sorted, empty-string expiries are folded into absent ones and
    /// absent scalars are folded into empty strings.
    pub fn normalized(&self) -> Self {
        let annotations = |items: &[Annotation]| {
            let mut items: Vec<Annotation> = items.iter().map(Annotation::normalized).collect();
            items.sort();
            items
        };
        let text = |value: &Option<String>| Some(value.clone().unwrap_or_default());

        let mut asns: Vec<AsnLink> = self
            .asns
            .iter()
            .map(|link| AsnLink {
                asn: link.asn,
                annotations: annotations(&link.annotations),
            })
            .collect();
        asns.sort();
        let mut networks: Vec<Network> = self
            .networks
            .iter()
            .map(|network| Network {
                annotations: annotations(&network.annotations),
                ..network.clone()
            })
            .collect();
        networks.sort();
        let mut fqdns: Vec<Fqdn> = self
            .fqdns
            .iter()
            .map(|fqdn| Fqdn {
                annotations: annotations(&fqdn.annotations),
                ..fqdn.clone()
            })
            .collect();
        fqdns.sort();
        let mut contacts = self.contacts.clone();
        contacts.sort();
        let mut national_certs = self.national_certs.clone();
        national_certs.sort();

        Self {
            organisation_id: self.organisation_id,
            name: text(&self.name),
            sector_id: self.sector_id,
            comment: text(&self.comment),
            ripe_org_hdl: text(&self.ripe_org_hdl),
            ti_handle: text(&self.ti_handle),
            first_handle: text(&self.first_handle),
            annotations: annotations(&self.annotations),
            asns,
            contacts,
            national_certs,
            networks,
            fqdns,
        }
    }
}

/// Read-path view of one ASN number.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct AsnDetails {
    pub asn: i64,
    pub organisation_ids: Vec<i64>,
    #[schema(value_type = Vec<Object>)]
    pub annotations: Vec<Annotation>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Sector ids arrive either as integers or, from older form-based clients, as strings
// where "" means "no sector".
fn sector_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(value)) => Ok(Some(value)),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nulls_are_tolerated_on_input() {
        let org: Organisation = serde_json::from_value(json!({
            "name": "Example",
            "comment": null,
            "sector_id": "",
            "annotations": null,
            "nationalcerts": [{"country_code": "DE", "comment": ""}],
            "networks": [{"address": "10.0.0.0/8", "comment": null}]
        }))
        .expect("organisation");
        assert_eq!(org.comment, None);
        assert_eq!(org.sector_id, None);
        assert!(org.annotations.is_empty());
        assert_eq!(org.national_certs.len(), 1);
        assert_eq!(org.networks[0].comment, "");
        assert_eq!(org.row().comment, "");
    }

    #[test]
    fn sector_id_accepts_numeric_strings() {
        let org: Organisation =
            serde_json::from_value(json!({"name": "x", "sector_id": "7"})).expect("organisation");
        assert_eq!(org.sector_id, Some(7));
    }

    #[test]
    fn normalized_ignores_order_and_empty_expiry() {
        let stored: Organisation = serde_json::from_value(json!({
            "organisation_id": 1,
            "name": "Example",
            "comment": "",
            "annotations": [{"tag": "b"}, {"tag": "a", "expires": ""}],
            "fqdns": [{"fqdn_id": 2, "fqdn": "b.example", "comment": ""},
                      {"fqdn_id": 1, "fqdn": "a.example", "comment": ""}]
        }))
        .expect("stored");
        let supplied: Organisation = serde_json::from_value(json!({
            "organisation_id": 1,
            "name": "Example",
            "annotations": [{"tag": "a"}, {"tag": "b"}],
            "fqdns": [{"fqdn_id": 1, "fqdn": "a.example", "comment": ""},
                      {"fqdn_id": 2, "fqdn": "b.example", "comment": ""}]
        }))
        .expect("supplied");
        assert_ne!(stored, supplied);
        assert_eq!(stored.normalized(), supplied.normalized());
    }
}
