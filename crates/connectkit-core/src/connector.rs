//! Lifecycle shared by every per-API connector.
//!
//! ```text
//! uninitialized --initialize--> initialized --connect--> connected
//!                                                        connected --disconnect--> disconnected
//!                                                        disconnected --connect--> connected
//! ```
//!
//! `connect` and `disconnect` perform no I/O. Requests only require that
//! `initialize` has run.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{strategy_for, AuthStrategy};
use crate::config::{ConnectorConfig, ConnectorOptions};
use crate::envelope::ResponseEnvelope;
use crate::error::ConnectorError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::pagination::{PaginateOptions, Pages, PaginationStrategy};
use crate::request::RequestSpec;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectorState {
    Uninitialized,
    Initialized,
    Connected,
    Disconnected,
}

/// Runtime every generated connector embeds.
pub struct ConnectorBase {
    http_client: Arc<dyn HttpClient>,
    transport: Option<Arc<Transport>>,
    state: ConnectorState,
}

impl Default for ConnectorBase {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorBase {
    /// A connector that talks to the network through reqwest.
    pub fn new() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            transport: None,
            state: ConnectorState::Uninitialized,
        }
    }

    pub const fn state(&self) -> ConnectorState {
        self.state
    }

    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectorState::Connected)
    }

    /// Resolves `options` over the connector's `defaults`, validates the
    /// result, and builds the transport.
    ///
    /// `auth_override` replaces the strategy derived from the auth
    /// descriptor. Re-initializing replaces the transport and its limiter.
    pub fn initialize(
        &mut self,
        defaults: ConnectorConfig,
        options: ConnectorOptions,
        auth_override: Option<Arc<dyn AuthStrategy>>,
    ) -> Result<(), ConnectorError> {
        let config = defaults.resolve(options)?;
        let auth = auth_override.or_else(|| {
            config
                .auth
                .as_ref()
                .map(|descriptor| strategy_for(descriptor, Arc::clone(&self.http_client)))
        });

        tracing::debug!(
            base_url = %config.base_url,
            timeout_ms = config.timeout_ms,
            max_attempts = config.retry.max_attempts,
            rate_limited = config.rate_limit.is_enabled(),
            hooks = config.hooks.len(),
            "connector initialized"
        );

        self.transport = Some(Arc::new(Transport::new(
            config,
            Arc::clone(&self.http_client),
            auth,
        )));
        self.state = ConnectorState::Initialized;
        Ok(())
    }

    pub async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.transport()?;
        self.state = ConnectorState::Connected;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), ConnectorError> {
        self.transport()?;
        self.state = ConnectorState::Disconnected;
        Ok(())
    }

    /// The resolved configuration, once initialized.
    pub fn config(&self) -> Option<&ConnectorConfig> {
        self.transport.as_deref().map(Transport::config)
    }

    pub fn transport(&self) -> Result<&Arc<Transport>, ConnectorError> {
        self.transport
            .as_ref()
            .ok_or_else(ConnectorError::not_initialized)
    }

    /// Sends one logical call and decodes `data` into `T`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
    ) -> Result<ResponseEnvelope<T>, ConnectorError> {
        self.transport()?.execute_as(spec).await
    }

    /// Sends one logical call and returns the raw JSON body.
    pub async fn send_value(
        &self,
        spec: &RequestSpec,
    ) -> Result<ResponseEnvelope<Value>, ConnectorError> {
        self.transport()?.execute(spec).await
    }

    /// Alias of [`send`](Self::send).
    pub async fn request<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
    ) -> Result<ResponseEnvelope<T>, ConnectorError> {
        self.send(spec).await
    }

    pub fn paginate<T: DeserializeOwned>(
        &self,
        spec: RequestSpec,
        strategy: PaginationStrategy,
        options: PaginateOptions,
    ) -> Result<Pages<T>, ConnectorError> {
        let transport = Arc::clone(self.transport()?);
        Ok(Pages::new(transport, spec, strategy, options))
    }
}
