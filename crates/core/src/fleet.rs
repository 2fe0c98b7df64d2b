// Fleet instance domain types
//
// Owned by the control plane. The identity prefix is unique across the fleet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Header carrying the caller's instance prefix on control calls.
pub const PREFIX_HEADER: &str = "x-control-prefix";
/// Header carrying the shared secret on control calls.
pub const SECRET_HEADER: &str = "x-control-secret";

/// One registered copy of the worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct FleetInstance {
    pub id: Uuid,
    pub name: String,
    /// Base URL of the instance's control surface.
    pub routing_url: String,
    pub identity_prefix: String,
    #[serde(skip_serializing, default)]
    pub shared_secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a fleet instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstance {
    pub name: String,
    pub routing_url: String,
    pub identity_prefix: String,
    pub shared_secret: String,
}

impl RegisterInstance {
    pub fn into_instance(self) -> FleetInstance {
        let now = Utc::now();
        FleetInstance {
            id: Uuid::now_v7(),
            name: self.name,
            routing_url: self.routing_url.trim_end_matches('/').to_string(),
            identity_prefix: self.identity_prefix,
            shared_secret: self.shared_secret,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_trims_routing_url() {
        let instance = RegisterInstance {
            name: "eu".into(),
            routing_url: "http://eu-1:9100/".into(),
            identity_prefix: "eu-1".into(),
            shared_secret: "s3cret".into(),
        }
        .into_instance();

        assert_eq!(instance.routing_url, "http://eu-1:9100");
        assert_eq!(instance.identity_prefix, "eu-1");
    }

    #[test]
    fn test_register_reads_camel_case() {
        let register: RegisterInstance = serde_json::from_str(
            r#"{"name":"eu","routingUrl":"http://eu-1:9100","identityPrefix":"eu-1","sharedSecret":"s3cret"}"#,
        )
        .unwrap();
        assert_eq!(register.identity_prefix, "eu-1");
        assert_eq!(register.shared_secret, "s3cret");
    }

    #[test]
    fn test_secret_not_serialized() {
        let instance = RegisterInstance {
            name: "eu".into(),
            routing_url: "http://eu-1:9100".into(),
            identity_prefix: "eu-1".into(),
            shared_secret: "s3cret".into(),
        }
        .into_instance();

        let json = serde_json::to_value(&instance).unwrap();
        assert!(!json.to_string().contains("s3cret"));
        assert_eq!(json["identityPrefix"], "eu-1");
        assert_eq!(json["routingUrl"], "http://eu-1:9100");
        assert!(json.get("createdAt").is_some());
    }
}
