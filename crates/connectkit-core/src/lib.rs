//! # Connectkit Core
//!
//! Shared transport runtime for connectkit API connectors.
//!
//! ## Overview
//!
//! Every generated connector builds its resource methods on this crate:
//!
//! - **Lifecycle** (`initialize`, `connect`, `disconnect`) through [`ConnectorBase`]
//! - **Transport** with per-attempt timeouts, and retry with backoff
//! - **Hooks** around every request, response, error and retry
//! - **Rate limiting** with a token bucket that pauses on server signals
//! - **Pagination** by cursor, offset, or single request with client chunking
//! - **Structured errors** with a fixed retryability taxonomy
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Auth descriptors and strategies (bearer, basic, API key, OAuth2 refresh) |
//! | [`config`] | Connector defaults, caller options and validation |
//! | [`connector`] | Connector lifecycle and the `send`/`paginate` contract |
//! | [`envelope`] | Response envelope with metadata |
//! | [`error`] | Error taxonomy |
//! | [`hooks`] | Hook phases, contexts and the ordered pipeline |
//! | [`http_client`] | HTTP client abstraction |
//! | [`normalize`] | Response body normalization |
//! | [`pagination`] | Pagination strategies and the page sequence |
//! | [`rate_limit`] | Token-bucket admission control |
//! | [`request`] | Request specs and prepared requests |
//! | [`retry`] | Retry policy and `Retry-After` parsing |
//! | [`transport`] | The attempt-cycle engine |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use connectkit_core::{
//!     ConnectorBase, ConnectorConfig, ConnectorOptions, PaginateOptions, PaginationStrategy,
//!     RequestSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), connectkit_core::ConnectorError> {
//!     let mut connector = ConnectorBase::new();
//!     connector.initialize(
//!         ConnectorConfig::new("https://api.example.com/v1"),
//!         ConnectorOptions::new().timeout_ms(10_000),
//!         None,
//!     )?;
//!     connector.connect().await?;
//!
//!     let lookup = RequestSpec::get("/customers/42").with_operation("customers.get");
//!     let customer = connector.send::<serde_json::Value>(&lookup).await?;
//!     println!("{}", customer.data);
//!
//!     let all = connector
//!         .paginate::<serde_json::Value>(
//!             RequestSpec::get("/customers"),
//!             PaginationStrategy::cursor(),
//!             PaginateOptions::new().page_size(50).max_items(500),
//!         )?
//!         .collect_items()
//!         .await?;
//!     println!("{} customers", all.len());
//!
//!     connector.disconnect().await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Resource methods │
//! └────────┬─────────┘
//!          │ send / paginate
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Connector Base   │────▶│ Pagination       │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Transport        │────▶│ Rate Limiter     │
//! │ (attempt cycle)  │────▶│ Hook Pipeline    │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ HTTP Client      │
//! │ (reqwest/script) │
//! └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`ConnectorError`]; retryability depends only on
//! the [`ErrorCode`]:
//!
//! ```rust
//! use connectkit_core::{ConnectorError, ErrorCode};
//!
//! fn handle_error(error: ConnectorError) {
//!     match error.code() {
//!         ErrorCode::RateLimit => {
//!             // retries were exhausted; back off at a higher level
//!         }
//!         ErrorCode::AuthFailed => {
//!             // ask the user for new credentials
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod http_client;
pub mod normalize;
pub mod pagination;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod transport;

// Re-export commonly used types at crate root for convenience

// Auth
pub use auth::{strategy_for, AuthDescriptor, AuthStrategy, OAuth2Auth, StaticAuth};

// Configuration
pub use config::{ConnectorConfig, ConnectorOptions};

// Connector lifecycle
pub use connector::{ConnectorBase, ConnectorState};

// Envelope types
pub use envelope::{ResponseEnvelope, ResponseMeta, ResponseModification};

// Error types
pub use error::{ConnectorError, ErrorCode, ErrorSource, HookError};

// Hooks
pub use hooks::{
    logging_hooks, AfterResponseContext, AfterResponseHook, BeforeRequestContext,
    BeforeRequestHook, ErrorContext, ErrorHook, Hook, HookFuture, HookHandler, HookPhase, HookSet,
    RetryContext, RetryHook,
};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient, ScriptedHttpClient,
};

// Pagination
pub use pagination::{
    CursorPagination, OffsetPagination, PaginateOptions, Pages, PaginationStrategy,
    SingleShotPagination,
};

// Rate limiting
pub use rate_limit::{RateLimitConfig, RateLimitInfo, RateLimitState, RateLimiter};

// Requests
pub use request::{PreparedRequest, RequestModification, RequestSpec};

// Retry policy
pub use retry::{parse_retry_after, RetryConfig};

// Transport
pub use transport::Transport;
