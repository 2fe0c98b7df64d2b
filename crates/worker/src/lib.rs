// Calsync fleet instance
//
// Wires the engine to real providers and exposes the control surface the
// control plane calls. The binary in main.rs owns startup and drain.

pub mod api;
pub mod config;
pub mod providers;

pub use api::{router, ControlState};
pub use config::{ConfigError, FleetConfig, GoogleOAuthConfig};
pub use providers::HttpProviders;
