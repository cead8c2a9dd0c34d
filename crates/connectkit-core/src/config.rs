//! Connector configuration.
//!
//! A connector ships [`ConnectorConfig`] defaults (base URL, user agent,
//! policies). Callers supply [`ConnectorOptions`], usually deserialized from
//! JSON or TOML, and `initialize` resolves the two into one immutable
//! config. Hooks are code-only and never deserialized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::auth::AuthDescriptor;
use crate::error::ConnectorError;
use crate::hooks::HookSet;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_USER_AGENT: &str = concat!("connectkit/", env!("CARGO_PKG_VERSION"));

/// Resolved, immutable configuration of one connector instance.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
    pub default_headers: BTreeMap<String, String>,
    pub default_query_params: BTreeMap<String, String>,
    pub auth: Option<AuthDescriptor>,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub hooks: HookSet,
    /// Strip `null` properties from response bodies.
    pub drop_nulls: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: String::from(DEFAULT_USER_AGENT),
            default_headers: BTreeMap::new(),
            default_query_params: BTreeMap::new(),
            auth: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            hooks: HookSet::default(),
            drop_nulls: false,
        }
    }
}

impl ConnectorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Applies caller options over these defaults and validates the result.
    ///
    /// Scalars and policies in `options` replace the defaults; header and
    /// query maps merge with the caller winning on conflicts; hooks append
    /// after the connector's own.
    pub fn resolve(mut self, options: ConnectorOptions) -> Result<Self, ConnectorError> {
        if let Some(base_url) = options.base_url {
            self.base_url = base_url;
        }
        if let Some(timeout_ms) = options.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(user_agent) = options.user_agent {
            self.user_agent = user_agent;
        }
        self.default_headers.extend(
            options
                .default_headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value)),
        );
        self.default_query_params.extend(options.default_query_params);
        if options.auth.is_some() {
            self.auth = options.auth;
        }
        if let Some(retry) = options.retry {
            self.retry = retry;
        }
        if let Some(rate_limit) = options.rate_limit {
            self.rate_limit = rate_limit;
        }
        self.hooks.extend(&options.hooks);
        if let Some(drop_nulls) = options.drop_nulls {
            self.drop_nulls = drop_nulls;
        }

        self.default_headers = std::mem::take(&mut self.default_headers)
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConnectorError> {
        let base_url = reqwest::Url::parse(&self.base_url).map_err(|error| {
            ConnectorError::invalid_config(format!(
                "base URL '{}' is not a valid URL: {error}",
                self.base_url
            ))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConnectorError::invalid_config(format!(
                "base URL '{}' must use http or https",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConnectorError::invalid_config(
                "timeoutMs must be greater than zero",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConnectorError::invalid_config(
                "retry.maxAttempts must be at least 1",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConnectorError::invalid_config(
                "retry.backoffMultiplier must be a finite number >= 1",
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConnectorError::invalid_config(
                "retry.initialDelayMs must not exceed retry.maxDelayMs",
            ));
        }
        let rate = self.rate_limit.requests_per_second;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConnectorError::invalid_config(
                "rateLimit.requestsPerSecond must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

/// Caller-supplied overrides. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorOptions {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub default_query_params: BTreeMap<String, String>,
    pub auth: Option<AuthDescriptor>,
    pub retry: Option<RetryConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(skip)]
    pub hooks: HookSet,
    pub drop_nulls: Option<bool>,
}

impl ConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn auth(mut self, auth: AuthDescriptor) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn hooks(mut self, hooks: HookSet) -> Self {
        self.hooks.extend(&hooks);
        self
    }

    pub fn drop_nulls(mut self, drop_nulls: bool) -> Self {
        self.drop_nulls = Some(drop_nulls);
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn default_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_query_params.insert(name.into(), value.into());
        self
    }
}
