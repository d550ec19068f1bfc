//! Service configuration: built-in defaults, then `config.toml`, then
//! environment variables (highest priority, matched by lowercased name).

use crate::provider::{ProviderError, SquareConfig};
use crate::retry::RetryOptions;
use crate::verification::SignatureScheme;
use crate::worker::{FailurePolicy, DEFAULT_DRAIN_LIMIT};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{error, warn};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `development`, `preview` or `production`.
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// Deployment identifier used to namespace queue keys.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub app_id: Option<String>,

    // Queue store
    #[serde(default)]
    pub upstash_redis_rest_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub upstash_redis_rest_token: Option<String>,

    // Webhook receiver
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub square_webhook_signature_key: Option<String>,
    #[serde(default)]
    pub signature_scheme: SignatureScheme,
    /// Sender ids with this prefix and no signature are sandbox test events.
    #[serde(default = "default_test_merchant_prefix", deserialize_with = "lenient::string")]
    pub test_merchant_prefix: String,

    // Provider
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub square_access_token: Option<String>,
    #[serde(default = "default_square_environment")]
    pub square_environment: String,
    #[serde(default = "default_square_api_version", deserialize_with = "lenient::string")]
    pub square_api_version: String,

    // Drain
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub webhook_process_token: Option<String>,
    #[serde(default = "default_drain_limit")]
    pub webhook_drain_default_limit: usize,
    #[serde(default)]
    pub webhook_dead_letter_on_failure: bool,

    // Retry
    #[serde(default = "default_retry_retries")]
    pub retry_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,

    // Cache revalidation
    #[serde(default)]
    pub revalidate_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub revalidate_secret: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed("")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.webhook_drain_default_limit == 0 {
            anyhow::bail!("webhook_drain_default_limit must be greater than 0");
        }
        if self.retry_retries == 0 {
            anyhow::bail!("retry_retries must be greater than 0");
        }
        if !self.retry_factor.is_finite() || self.retry_factor < 1.0 {
            anyhow::bail!("retry_factor must be a finite number >= 1");
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be below retry_base_delay_ms");
        }
        Ok(())
    }

    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("Invalid server address")
    }

    pub fn is_development(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("development")
    }

    /// REST URL and token for the queue store, when both are set.
    pub fn queue_store_credentials(&self) -> Option<(&str, &str)> {
        let url = non_empty(&self.upstash_redis_rest_url)?;
        let token = non_empty(&self.upstash_redis_rest_token)?;
        Some((url, token))
    }

    /// Queue namespace. A missing identifier outside development is logged as
    /// a configuration error; the queue then shares the `default` namespace.
    pub fn queue_namespace(&self) -> Option<&str> {
        let ns = non_empty(&self.app_id);
        if ns.is_none() && !self.is_development() {
            error!(app_env = %self.app_env, "APP_ID is not set; queue falls back to the default namespace");
        }
        ns
    }

    pub fn signature_key(&self) -> Option<&str> {
        non_empty(&self.square_webhook_signature_key)
    }

    /// Drain/replay bearer token. `None` leaves those endpoints open.
    pub fn process_token(&self) -> Option<&str> {
        let token = non_empty(&self.webhook_process_token);
        if token.is_none() {
            warn!("WEBHOOK_PROCESS_TOKEN is not set; drain and replay endpoints are unauthenticated");
        }
        token
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.webhook_dead_letter_on_failure {
            FailurePolicy::DeadLetter
        } else {
            FailurePolicy::LogOnly
        }
    }

    pub fn retry_options(&self) -> RetryOptions<ProviderError> {
        RetryOptions {
            retries: self.retry_retries,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            factor: self.retry_factor,
            ..RetryOptions::for_provider()
        }
    }

    pub fn square_config(&self) -> SquareConfig {
        SquareConfig {
            access_token: self.square_access_token.clone(),
            environment: self.square_environment.clone(),
            api_version: self.square_api_version.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            app_env: default_app_env(),
            app_id: None,
            upstash_redis_rest_url: None,
            upstash_redis_rest_token: None,
            square_webhook_signature_key: None,
            signature_scheme: SignatureScheme::default(),
            test_merchant_prefix: default_test_merchant_prefix(),
            square_access_token: None,
            square_environment: default_square_environment(),
            square_api_version: default_square_api_version(),
            webhook_process_token: None,
            webhook_drain_default_limit: default_drain_limit(),
            webhook_dead_letter_on_failure: false,
            retry_retries: default_retry_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_factor: default_retry_factor(),
            revalidate_url: None,
            revalidate_secret: None,
        }
    }
}

/// Environment values that look like numbers or booleans reach serde as
/// such. Secrets, tokens and identifiers take them back as text.
mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    impl From<Scalar> for String {
        fn from(value: Scalar) -> Self {
            match value {
                Scalar::Text(s) => s,
                Scalar::Unsigned(n) => n.to_string(),
                Scalar::Signed(n) => n.to_string(),
                Scalar::Float(n) => n.to_string(),
                Scalar::Bool(b) => b.to_string(),
            }
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Scalar::deserialize(deserializer).map(String::from)
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_test_merchant_prefix() -> String {
    "6SSW".to_string()
}

fn default_square_environment() -> String {
    "sandbox".to_string()
}

fn default_square_api_version() -> String {
    "2024-10-17".to_string()
}

fn default_drain_limit() -> usize {
    DEFAULT_DRAIN_LIMIT
}

fn default_retry_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_retry_factor() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figment() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_figment(figment()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.webhook_drain_default_limit, 50);
        assert_eq!(config.signature_scheme, SignatureScheme::Auto);
        assert_eq!(config.failure_policy(), FailurePolicy::LogOnly);
        assert!(config.queue_store_credentials().is_none());
    }

    #[test]
    fn queue_needs_both_credentials() {
        let config = Config::from_figment(
            figment().merge(Serialized::default("upstash_redis_rest_url", "https://kv.example")),
        )
        .unwrap();
        assert!(config.queue_store_credentials().is_none());

        let config = Config::from_figment(
            figment()
                .merge(Serialized::default("upstash_redis_rest_url", "https://kv.example"))
                .merge(Serialized::default("upstash_redis_rest_token", "tok")),
        )
        .unwrap();
        assert_eq!(config.queue_store_credentials(), Some(("https://kv.example", "tok")));
    }

    #[test]
    fn rejects_invalid_retry_settings() {
        let result = Config::from_figment(figment().merge(Serialized::default("retry_retries", 0)));
        assert!(result.is_err());

        let result = Config::from_figment(figment().merge(Serialized::default("retry_factor", 0.5)));
        assert!(result.is_err());
    }

    #[test]
    fn numeric_env_values_load_as_text() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("APP_ID", "12345");
            jail.set_env("WEBHOOK_PROCESS_TOKEN", "987654");
            jail.set_env("SQUARE_WEBHOOK_SIGNATURE_KEY", "-42");
            jail.set_env("UPSTASH_REDIS_REST_TOKEN", "true");
            jail.set_env("SQUARE_API_VERSION", "20241017");
            jail.set_env("WEBHOOK_DRAIN_DEFAULT_LIMIT", "25");

            let config = Config::from_figment(figment().merge(Env::prefixed("")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.app_id.as_deref(), Some("12345"));
            assert_eq!(config.process_token(), Some("987654"));
            assert_eq!(config.signature_key(), Some("-42"));
            assert_eq!(config.upstash_redis_rest_token.as_deref(), Some("true"));
            assert_eq!(config.square_api_version, "20241017");
            assert_eq!(config.webhook_drain_default_limit, 25);
            Ok(())
        });
    }

    #[test]
    fn scheme_and_policy_from_overrides() {
        let config = Config::from_figment(
            figment()
                .merge(Serialized::default("signature_scheme", "timestamped"))
                .merge(Serialized::default("webhook_dead_letter_on_failure", true)),
        )
        .unwrap();
        assert_eq!(config.signature_scheme, SignatureScheme::Timestamped);
        assert_eq!(config.failure_policy(), FailurePolicy::DeadLetter);
    }
}
