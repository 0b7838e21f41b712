//! OpenAPI document for the contact database API.
use crate::api::types::{CommitRequest, CommitResult, ErrorResponse, HealthStatus};
use crate::api::{commit, orgs, system};
use crate::engine::error::FieldViolation;
use crate::model::{
    AsnDetails, AsnLink, CommandKind, Contact, Fqdn, NationalCert, Network, Organisation,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "contactdb",
        version = "v1",
        description = "Contact database: organisations, their contacts and the network resources they are responsible for"
    ),
    paths(
        system::ping,
        system::health,
        orgs::get_organisation,
        orgs::get_automatic_organisation,
        orgs::get_asn,
        commit::commit,
    ),
    components(schemas(
        HealthStatus,
        ErrorResponse,
        FieldViolation,
        CommitRequest,
        CommitResult,
        CommandKind,
        Organisation,
        AsnLink,
        AsnDetails,
        Contact,
        NationalCert,
        Network,
        Fqdn,
    )),
    tags(
        (name = "system", description = "Liveness and health"),
        (name = "organisations", description = "Organisation aggregates and batch commits")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/contactdb/ping",
            "/api/contactdb/health",
            "/api/contactdb/org/manual/{id}",
            "/api/contactdb/org/auto/{id}",
            "/api/contactdb/asn/manual/{number}",
            "/api/contactdb/org/manual/commit",
        ] {
            assert!(paths.contains(&expected), "missing {expected}: {paths:?}");
        }
    }

    #[test]
    fn commit_documents_its_request_body() {
        let doc = serde_json::to_value(ApiDoc::openapi()).expect("json");
        let body = &doc["paths"]["/api/contactdb/org/manual/commit"]["post"]["requestBody"];
        let schema = body["content"]["application/json"]["schema"]["$ref"]
            .as_str()
            .expect("schema ref");
        assert!(schema.ends_with("/CommitRequest"), "{schema}");
    }
}
