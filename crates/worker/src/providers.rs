// Per-tenant provider clients for a reconciliation pass
//
// One shared reqwest connection pool; each tenant gets its own Google and
// Notion client carrying that tenant's tokens.

use std::sync::Arc;

use calsync_core::{CalendarProvider, DocumentProvider, ProviderFactory, SyncError, Tenant};
use calsync_google::{CallbackUrls, GoogleCalendarClient, GoogleCredentials};
use calsync_notion::NotionClient;
use reqwest::Client;

use crate::config::{FleetConfig, GoogleOAuthConfig};

pub struct HttpProviders {
    http: Client,
    google: GoogleOAuthConfig,
    callback_urls: CallbackUrls,
}

impl HttpProviders {
    pub fn new(google: GoogleOAuthConfig, callback_urls: CallbackUrls) -> Self {
        Self {
            http: Client::new(),
            google,
            callback_urls,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.google.clone(), config.callback_urls.clone())
    }
}

fn missing(what: &str, tenant: &Tenant) -> SyncError {
    SyncError::configuration(
        format!("missing_{what}"),
        format!("tenant has no {what}"),
        tenant.id,
    )
}

impl ProviderFactory for HttpProviders {
    fn calendar_for(&self, tenant: &Tenant) -> Result<Arc<dyn CalendarProvider>, SyncError> {
        let redirect_url = self
            .callback_urls
            .resolve(tenant.callback_version.as_deref())
            .map_err(|e| {
                SyncError::configuration("unknown_callback_version", e.to_string(), tenant.id)
            })?;
        let access_token = tenant
            .google_access_token
            .clone()
            .ok_or_else(|| missing("google_token", tenant))?;

        let credentials = GoogleCredentials {
            client_id: self.google.client_id.clone(),
            client_secret: self.google.client_secret.clone(),
            redirect_url: redirect_url.to_string(),
            access_token,
            refresh_token: tenant.google_refresh_token.clone(),
        };
        Ok(Arc::new(
            GoogleCalendarClient::new(credentials).with_http_client(self.http.clone()),
        ))
    }

    fn documents_for(&self, tenant: &Tenant) -> Result<Arc<dyn DocumentProvider>, SyncError> {
        let token = tenant
            .notion_token
            .clone()
            .ok_or_else(|| missing("notion_token", tenant))?;
        Ok(Arc::new(NotionClient::new(token).with_http_client(self.http.clone())))
    }
}
