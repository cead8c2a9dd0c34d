//! Authentication descriptors and the strategies that apply them.
//!
//! [`AuthDescriptor`] is plain configuration data. Behavior lives behind the
//! [`AuthStrategy`] trait, which the transport calls once per attempt to
//! decorate headers and, for refreshable credentials, once more when the
//! server rejects a stale token.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::ConnectorError;
use crate::http_client::{HttpClient, HttpRequest};

/// Tokens are refreshed this long before their advertised expiry.
const EXPIRY_SKEW: time::Duration = time::Duration::seconds(30);

/// Credentials a connector authenticates with.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthDescriptor {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    #[serde(rename = "oauth2", rename_all = "camelCase")]
    OAuth2 {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default, with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
        #[serde(default)]
        token_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ApiKey {
        header: String,
        value: String,
    },
}

impl Debug for AuthDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Secrets never reach logs.
        match self {
            Self::Bearer { .. } => f.write_str("AuthDescriptor::Bearer(..)"),
            Self::Basic { username, .. } => f
                .debug_struct("AuthDescriptor::Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::OAuth2 {
                client_id,
                token_url,
                expires_at,
                ..
            } => f
                .debug_struct("AuthDescriptor::OAuth2")
                .field("client_id", client_id)
                .field("token_url", token_url)
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            Self::ApiKey { header, .. } => f
                .debug_struct("AuthDescriptor::ApiKey")
                .field("header", header)
                .finish_non_exhaustive(),
        }
    }
}

pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectorError>> + Send + 'a>>;

/// Applies credentials to outbound requests.
pub trait AuthStrategy: Send + Sync {
    /// Adds credentials to the lowercased header map of one attempt.
    fn apply<'a>(&'a self, headers: &'a mut BTreeMap<String, String>) -> AuthFuture<'a, ()>;

    /// Whether [`refresh`](AuthStrategy::refresh) can obtain new credentials.
    fn can_refresh(&self) -> bool {
        false
    }

    /// Obtains a fresh access token after the server rejected the attempt
    /// that carried `rejected` headers.
    ///
    /// When the cached credentials already differ from the rejected ones,
    /// another caller refreshed in the meantime and the cached token is
    /// returned without a new exchange.
    fn refresh<'a>(&'a self, _rejected: &'a BTreeMap<String, String>) -> AuthFuture<'a, String> {
        Box::pin(async {
            Err(ConnectorError::auth(
                "credentials cannot be refreshed by this strategy",
            ))
        })
    }
}

/// Builds the strategy matching a descriptor. OAuth2 refreshes go through `http_client`.
pub fn strategy_for(
    descriptor: &AuthDescriptor,
    http_client: Arc<dyn HttpClient>,
) -> Arc<dyn AuthStrategy> {
    match descriptor {
        AuthDescriptor::Bearer { token } => Arc::new(StaticAuth::header(
            "authorization",
            format!("Bearer {token}"),
        )),
        AuthDescriptor::Basic { username, password } => {
            let credentials = format!("{username}:{}", password.as_deref().unwrap_or_default());
            Arc::new(StaticAuth::header(
                "authorization",
                format!("Basic {}", STANDARD.encode(credentials)),
            ))
        }
        AuthDescriptor::ApiKey { header, value } => {
            Arc::new(StaticAuth::header(header.clone(), value.clone()))
        }
        AuthDescriptor::OAuth2 {
            client_id,
            client_secret,
            refresh_token,
            access_token,
            expires_at,
            token_url,
        } => Arc::new(OAuth2Auth {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            token_url: token_url.clone(),
            http_client,
            state: Mutex::new(TokenState {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                expires_at: *expires_at,
            }),
        }),
    }
}

/// Credentials that never change: one header with a fixed value.
#[derive(Clone)]
pub struct StaticAuth {
    name: String,
    value: String,
}

impl StaticAuth {
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            value: value.into(),
        }
    }
}

impl AuthStrategy for StaticAuth {
    fn apply<'a>(&'a self, headers: &'a mut BTreeMap<String, String>) -> AuthFuture<'a, ()> {
        headers.insert(self.name.clone(), self.value.clone());
        Box::pin(async { Ok(()) })
    }
}

#[derive(Debug)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: String,
    expires_at: Option<OffsetDateTime>,
}

impl TokenState {
    /// The cached token, unless it is the one `rejected` carried.
    fn replacement_for(&self, rejected: &BTreeMap<String, String>) -> Option<&str> {
        let token = self.usable_token()?;
        let sent = rejected.get("authorization")?;
        (sent.strip_prefix("Bearer ") != Some(token)).then_some(token)
    }

    fn usable_token(&self) -> Option<&str> {
        let token = self.access_token.as_deref()?;
        match self.expires_at {
            Some(expires_at) if OffsetDateTime::now_utc() + EXPIRY_SKEW >= expires_at => None,
            _ => Some(token),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 refresh-token strategy.
///
/// The token state is guarded by an async mutex held across the refresh
/// exchange, so concurrent callers observing an expired token trigger a
/// single refresh.
pub struct OAuth2Auth {
    client_id: String,
    client_secret: String,
    token_url: Option<String>,
    http_client: Arc<dyn HttpClient>,
    state: Mutex<TokenState>,
}

impl OAuth2Auth {
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, ConnectorError> {
        let token_url = self.token_url.as_deref().ok_or_else(|| {
            ConnectorError::auth("access token expired and no token URL is configured")
        })?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", state.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ]
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

        let request = HttpRequest::post(token_url)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_header("accept", "application/json")
            .with_body(form);

        tracing::debug!(token_url, "refreshing oauth2 access token");

        let response = self.http_client.execute(request).await.map_err(|error| {
            ConnectorError::auth(format!("token refresh request failed: {}", error.message()))
        })?;

        if !response.is_success() {
            return Err(ConnectorError::auth(format!(
                "token refresh rejected with status {}",
                response.status
            )));
        }

        let token: TokenResponse = serde_json::from_str(&response.body).map_err(|error| {
            ConnectorError::auth(format!("token refresh returned an unreadable body: {error}"))
        })?;

        state.expires_at = match token.expires_in {
            Some(seconds) => Some(
                OffsetDateTime::now_utc()
                    .checked_add(time::Duration::seconds(seconds))
                    .ok_or_else(|| {
                        ConnectorError::auth(format!(
                            "token refresh returned an out-of-range expires_in: {seconds}"
                        ))
                    })?,
            ),
            None => None,
        };
        if let Some(refresh_token) = token.refresh_token {
            state.refresh_token = refresh_token;
        }
        state.access_token = Some(token.access_token.clone());

        Ok(token.access_token)
    }
}

impl AuthStrategy for OAuth2Auth {
    fn apply<'a>(&'a self, headers: &'a mut BTreeMap<String, String>) -> AuthFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let token = match state.usable_token() {
                Some(token) => token.to_owned(),
                None => self.refresh_locked(&mut state).await?,
            };
            headers.insert(String::from("authorization"), format!("Bearer {token}"));
            Ok(())
        })
    }

    fn can_refresh(&self) -> bool {
        self.token_url.is_some()
    }

    fn refresh<'a>(&'a self, rejected: &'a BTreeMap<String, String>) -> AuthFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(token) = state.replacement_for(rejected) {
                tracing::debug!("access token already refreshed by a concurrent call");
                return Ok(token.to_owned());
            }
            self.refresh_locked(&mut state).await
        })
    }
}
