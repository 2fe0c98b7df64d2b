// Versioned OAuth callback URLs
//
// Each tenant's Google grant was issued against one redirect URL. Tenants store
// the version key; the worker is configured with the whole `{version -> url}`
// map and must resolve the key before it can refresh a token.

use std::collections::BTreeMap;

use calsync_core::{ClientError, ClientResult};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CallbackUrlsError {
    #[error("callback URL map is not a JSON object of strings: {0}")]
    Malformed(String),

    #[error("callback URL map is empty")]
    Empty,

    #[error("callback URL for version {version} is not a valid URL: {url}")]
    InvalidUrl { version: String, url: String },
}

/// Mapping from callback version to redirect URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackUrls(BTreeMap<String, String>);

impl CallbackUrls {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        Self(urls)
    }

    /// Parse `{"v1": "https://...", ...}`. Every value must be an absolute URL.
    pub fn from_json(raw: &str) -> Result<Self, CallbackUrlsError> {
        let urls: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|e| CallbackUrlsError::Malformed(e.to_string()))?;
        if urls.is_empty() {
            return Err(CallbackUrlsError::Empty);
        }
        for (version, url) in &urls {
            if url::Url::parse(url).is_err() {
                return Err(CallbackUrlsError::InvalidUrl {
                    version: version.clone(),
                    url: url.clone(),
                });
            }
        }
        Ok(Self(urls))
    }

    /// Redirect URL for a tenant's callback version.
    pub fn resolve(&self, version: Option<&str>) -> ClientResult<&str> {
        let version = version
            .ok_or_else(|| ClientError::Configuration("tenant has no callback version".into()))?;
        self.0
            .get(version)
            .map(String::as_str)
            .ok_or_else(|| ClientError::Configuration(format!("unknown callback version {version}")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
