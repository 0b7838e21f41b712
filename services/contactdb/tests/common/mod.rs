#![allow(dead_code)]

use contactdb::engine::Engine;
use contactdb::store::memory::InMemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn memory_engine() -> (Engine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (Engine::new(store.clone()), store)
}

/// A fully populated aggregate in wire format.
pub fn sample_org(name: &str) -> Value {
    json!({
        "name": name,
        "comment": "national team",
        "ripe_org_hdl": "ORG-EX1-RIPE",
        "ti_handle": "",
        "first_handle": null,
        "annotations": [{"tag": "government"}],
        "asns": [
            {"asn": 64496, "annotations": [{"tag": "transit", "expires": "2030-01-01"}]}
        ],
        "contacts": [{
            "firstname": "Ada",
            "lastname": "Lovelace",
            "tel": "+49 30 1234",
            "openpgp_fpr": "",
            "email": "ada@example.org",
            "comment": ""
        }],
        "national_certs": [{"country_code": "DE", "comment": ""}],
        "networks": [
            {"address": "192.0.2.0/24", "comment": "lab", "annotations": [{"tag": "whitelist"}]}
        ],
        "fqdns": [{"fqdn": "cert.example.org", "comment": "", "annotations": []}]
    })
}
