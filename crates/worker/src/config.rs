// Fleet instance configuration loaded from environment variables.
// Decision: Everything is validated up front; a bad key stops the process before any loop starts
// Decision: Parsing goes through a lookup function so tests never touch the process environment

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use calsync_core::PlanTier;
use calsync_engine::{PassSettings, SchedulerConfig, DEFAULT_PASS_TIMEOUT};
use calsync_google::CallbackUrls;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(String),

    #[error("environment variable {key} is invalid: {reason}")]
    Invalid { key: String, reason: String },
}

/// Google OAuth client the tenants' grants were issued to.
#[derive(Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for GoogleOAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleOAuthConfig")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Identity of this instance in the fleet
    pub instance_prefix: String,
    /// Shared secret expected on control calls
    pub control_secret: String,
    pub database_url: String,
    pub google: GoogleOAuthConfig,
    pub callback_urls: CallbackUrls,
    pub time_min_days: i64,
    pub time_max_days: i64,
    /// Loops per plan tier
    pub workers: BTreeMap<PlanTier, usize>,
    pub sync_timeout: Duration,
    pub min_sync_interval: Duration,
    pub cooldowns: BTreeMap<PlanTier, Duration>,
    pub idle_interval: Duration,
    pub shutdown_max_wait: Duration,
    pub port: u16,
    pub log_dir: PathBuf,
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(key, default.as_secs()).map(Duration::from_secs)
    }
}

impl FleetConfig {
    /// Load configuration from the process environment
    ///
    /// Required: `INSTANCE_PREFIX`, `CONTROL_SECRET`, `DATABASE_URL`,
    /// `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `CALLBACK_URLS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let scheduler = SchedulerConfig::default();

        let instance_prefix = env.required("INSTANCE_PREFIX")?;
        let control_secret = env.required("CONTROL_SECRET")?;
        let database_url = env.required("DATABASE_URL")?;
        let google = GoogleOAuthConfig {
            client_id: env.required("GOOGLE_CLIENT_ID")?,
            client_secret: env.required("GOOGLE_CLIENT_SECRET")?,
        };
        let callback_urls = CallbackUrls::from_json(&env.required("CALLBACK_URLS")?).map_err(|e| {
            ConfigError::Invalid {
                key: "CALLBACK_URLS".to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut workers = BTreeMap::new();
        let mut cooldowns = BTreeMap::new();
        for tier in PlanTier::ALL {
            let suffix = tier.as_str().to_ascii_uppercase();
            workers.insert(tier, env.parsed(&format!("WORKERS_{suffix}"), 2usize)?);
            cooldowns.insert(
                tier,
                env.millis(&format!("COOLDOWN_MS_{suffix}"), scheduler.cooldown(tier))?,
            );
        }

        let time_min_days = env.parsed("SYNC_TIME_MIN_DAYS", 30i64)?;
        let time_max_days = env.parsed("SYNC_TIME_MAX_DAYS", 90i64)?;
        for (key, days) in [("SYNC_TIME_MIN_DAYS", time_min_days), ("SYNC_TIME_MAX_DAYS", time_max_days)] {
            if days < 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must not be negative".to_string(),
                });
            }
        }

        let sync_timeout = env.millis("SYNC_TIMEOUT_MS", DEFAULT_PASS_TIMEOUT)?;
        if sync_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SYNC_TIMEOUT_MS".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            instance_prefix,
            control_secret,
            database_url,
            google,
            callback_urls,
            time_min_days,
            time_max_days,
            workers,
            sync_timeout,
            min_sync_interval: env.secs("MIN_SYNC_INTERVAL_SECS", scheduler.min_sync_interval)?,
            cooldowns,
            idle_interval: env.millis("IDLE_INTERVAL_MS", scheduler.idle_interval)?,
            shutdown_max_wait: env.secs("SHUTDOWN_MAX_WAIT_SECS", Duration::from_secs(60))?,
            port: env.parsed("PORT", 9100u16)?,
            log_dir: env
                .optional("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cooldowns: self.cooldowns.clone(),
            min_sync_interval: self.min_sync_interval,
            idle_interval: self.idle_interval,
            ..SchedulerConfig::default()
        }
    }

    pub fn pass_settings(&self) -> PassSettings {
        PassSettings {
            time_min_days: self.time_min_days,
            time_max_days: self.time_max_days,
            ..PassSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("INSTANCE_PREFIX", "eu-1"),
            ("CONTROL_SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/calsync"),
            ("GOOGLE_CLIENT_ID", "client"),
            ("GOOGLE_CLIENT_SECRET", "secret"),
            ("CALLBACK_URLS", r#"{"v1":"https://app.example/callback"}"#),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<FleetConfig, ConfigError> {
        FleetConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.instance_prefix, "eu-1");
        assert_eq!(config.time_min_days, 30);
        assert_eq!(config.time_max_days, 90);
        assert_eq!(config.sync_timeout, Duration::from_secs(3600));
        assert_eq!(config.min_sync_interval, Duration::from_secs(300));
        assert_eq!(config.idle_interval, Duration::from_millis(5000));
        assert_eq!(config.shutdown_max_wait, Duration::from_secs(60));
        assert_eq!(config.port, 9100);
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        assert!(PlanTier::ALL.iter().all(|t| config.workers[t] == 2));
        assert_eq!(config.cooldowns[&PlanTier::Free], Duration::from_millis(5000));
        assert_eq!(config.cooldowns[&PlanTier::Pro], Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides() {
        let mut env = base_env();
        env.insert("WORKERS_SPONSOR", "0");
        env.insert("COOLDOWN_MS_INIT", "250");
        env.insert("SYNC_TIMEOUT_MS", "90000");
        env.insert("PORT", "9200");
        let config = load(&env).unwrap();

        assert_eq!(config.workers[&PlanTier::Sponsor], 0);
        assert_eq!(config.cooldowns[&PlanTier::Init], Duration::from_millis(250));
        assert_eq!(config.sync_timeout, Duration::from_secs(90));
        assert_eq!(config.port, 9200);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.cooldown(PlanTier::Init), Duration::from_millis(250));
        assert_eq!(scheduler.max_pass_retries, 3);
    }

    #[test]
    fn test_missing_required_key() {
        let mut env = base_env();
        env.remove("CONTROL_SECRET");
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing("CONTROL_SECRET".into())
        );

        let mut env = base_env();
        env.insert("GOOGLE_CLIENT_ID", "   ");
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing("GOOGLE_CLIENT_ID".into())
        );
    }

    #[test]
    fn test_malformed_callback_map() {
        let mut env = base_env();
        env.insert("CALLBACK_URLS", "not json");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key, .. }) if key == "CALLBACK_URLS"
        ));
    }

    #[test]
    fn test_malformed_numbers() {
        let mut env = base_env();
        env.insert("WORKERS_PRO", "two");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key, .. }) if key == "WORKERS_PRO"
        ));

        let mut env = base_env();
        env.insert("SYNC_TIME_MIN_DAYS", "-1");
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));

        let mut env = base_env();
        env.insert("SYNC_TIMEOUT_MS", "0");
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));
    }
}
