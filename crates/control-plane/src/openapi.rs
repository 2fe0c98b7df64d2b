// OpenAPI specification generation
//
// Shared by the operator server (Swagger UI) and the export-openapi binary.

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use crate::client::InstanceLiveness;
use calsync_core::{FleetInstance, RegisterInstance};
use utoipa::OpenApi;

/// OpenAPI documentation for the calsync operator API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::instances::register_instance,
        api::instances::list_instances,
        api::instances::get_instance,
        api::instances::deregister_instance,
        api::instances::instance_liveness,
        api::instances::stop_instance,
        api::instances::exit_instance,
        api::instances::instance_report,
        api::instances::set_instance_timeout,
        api::instances::instance_log_files,
        api::instances::instance_logs_for_day,
        api::instances::instance_log_file,
        api::fleet::fleet_liveness,
    ),
    components(
        schemas(
            FleetInstance, RegisterInstance, InstanceLiveness, ErrorResponse,
            api::instances::TimeoutRequest,
            api::fleet::MemberLiveness,
            ListResponse<FleetInstance>,
            ListResponse<api::fleet::MemberLiveness>,
        )
    ),
    tags(
        (name = "instances", description = "Fleet inventory endpoints"),
        (name = "control", description = "Control calls proxied to one instance"),
        (name = "logs", description = "Log access proxied to one instance"),
        (name = "fleet", description = "Fleet-wide endpoints")
    ),
    info(
        title = "Calsync Operator API",
        version = "0.3.0",
        description = "Inventory and control of calsync worker instances",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_operator_paths() {
        let json = ApiDoc::to_json().unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/v1/instances"));
        assert!(paths.contains_key("/v1/instances/{prefix}/logs/{date}"));
        assert!(paths.contains_key("/v1/fleet/liveness"));
    }

    #[test]
    fn test_register_schema_accepts_secret() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let register = &doc["components"]["schemas"]["RegisterInstance"]["properties"];
        assert!(register.get("sharedSecret").is_some());
    }
}
