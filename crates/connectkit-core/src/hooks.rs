//! Ordered middleware around every request.
//!
//! A [`Hook`] is bound to exactly one phase by the variant of its
//! [`HookHandler`]. Each phase receives its own context type, and hooks can
//! only change a call through the capabilities those contexts expose
//! (`modify_request`, `abort`, `modify_response`).
//!
//! | Phase | Context | Capabilities |
//! |-------|---------|--------------|
//! | `beforeRequest` | [`BeforeRequestContext`] | `modify_request`, `abort` |
//! | `afterResponse` | [`AfterResponseContext`] | `modify_response` |
//! | `onError` | [`ErrorContext`] | read-only |
//! | `onRetry` | [`RetryContext`] | read-only |

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::envelope::{ResponseEnvelope, ResponseModification};
use crate::error::{ConnectorError, HookError};
use crate::request::{PreparedRequest, RequestModification};

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>;

/// Lifecycle phase a hook is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    BeforeRequest,
    AfterResponse,
    OnError,
    OnRetry,
}

pub trait BeforeRequestHook: Send + Sync {
    fn before_request<'a>(&'a self, ctx: &'a mut BeforeRequestContext) -> HookFuture<'a>;
}

pub trait AfterResponseHook: Send + Sync {
    fn after_response<'a>(&'a self, ctx: &'a mut AfterResponseContext) -> HookFuture<'a>;
}

pub trait ErrorHook: Send + Sync {
    fn on_error<'a>(&'a self, ctx: &'a ErrorContext) -> HookFuture<'a>;
}

pub trait RetryHook: Send + Sync {
    fn on_retry<'a>(&'a self, ctx: &'a RetryContext) -> HookFuture<'a>;
}

/// Phase-tagged hook implementation.
#[derive(Clone)]
pub enum HookHandler {
    BeforeRequest(Arc<dyn BeforeRequestHook>),
    AfterResponse(Arc<dyn AfterResponseHook>),
    OnError(Arc<dyn ErrorHook>),
    OnRetry(Arc<dyn RetryHook>),
}

impl HookHandler {
    pub const fn phase(&self) -> HookPhase {
        match self {
            Self::BeforeRequest(_) => HookPhase::BeforeRequest,
            Self::AfterResponse(_) => HookPhase::AfterResponse,
            Self::OnError(_) => HookPhase::OnError,
            Self::OnRetry(_) => HookPhase::OnRetry,
        }
    }
}

/// Named, priority-ordered middleware unit. Lower priorities run first.
#[derive(Clone)]
pub struct Hook {
    name: String,
    priority: i32,
    handler: HookHandler,
}

impl Debug for Hook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Hook {
    pub fn new(name: impl Into<String>, handler: HookHandler) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            handler,
        }
    }

    pub fn before_request(name: impl Into<String>, hook: impl BeforeRequestHook + 'static) -> Self {
        Self::new(name, HookHandler::BeforeRequest(Arc::new(hook)))
    }

    pub fn after_response(name: impl Into<String>, hook: impl AfterResponseHook + 'static) -> Self {
        Self::new(name, HookHandler::AfterResponse(Arc::new(hook)))
    }

    pub fn on_error(name: impl Into<String>, hook: impl ErrorHook + 'static) -> Self {
        Self::new(name, HookHandler::OnError(Arc::new(hook)))
    }

    pub fn on_retry(name: impl Into<String>, hook: impl RetryHook + 'static) -> Self {
        Self::new(name, HookHandler::OnRetry(Arc::new(hook)))
    }

    /// Synchronous `beforeRequest` hook from a closure.
    pub fn before_request_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut BeforeRequestContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::before_request(name, SyncHook(f))
    }

    /// Synchronous `afterResponse` hook from a closure.
    pub fn after_response_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut AfterResponseContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::after_response(name, SyncHook(f))
    }

    /// Synchronous `onError` hook from a closure.
    pub fn on_error_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ErrorContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::on_error(name, SyncHook(f))
    }

    /// Synchronous `onRetry` hook from a closure.
    pub fn on_retry_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RetryContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::on_retry(name, SyncHook(f))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn priority(&self) -> i32 {
        self.priority
    }

    pub const fn phase(&self) -> HookPhase {
        self.handler.phase()
    }
}

struct SyncHook<F>(F);

impl<F> BeforeRequestHook for SyncHook<F>
where
    F: Fn(&mut BeforeRequestContext) -> Result<(), HookError> + Send + Sync,
{
    fn before_request<'a>(&'a self, ctx: &'a mut BeforeRequestContext) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(ctx)))
    }
}

impl<F> AfterResponseHook for SyncHook<F>
where
    F: Fn(&mut AfterResponseContext) -> Result<(), HookError> + Send + Sync,
{
    fn after_response<'a>(&'a self, ctx: &'a mut AfterResponseContext) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(ctx)))
    }
}

impl<F> ErrorHook for SyncHook<F>
where
    F: Fn(&ErrorContext) -> Result<(), HookError> + Send + Sync,
{
    fn on_error<'a>(&'a self, ctx: &'a ErrorContext) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(ctx)))
    }
}

impl<F> RetryHook for SyncHook<F>
where
    F: Fn(&RetryContext) -> Result<(), HookError> + Send + Sync,
{
    fn on_retry<'a>(&'a self, ctx: &'a RetryContext) -> HookFuture<'a> {
        Box::pin(std::future::ready((self.0)(ctx)))
    }
}

/// Hooks grouped by phase, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    before_request: Vec<Hook>,
    after_response: Vec<Hook>,
    on_error: Vec<Hook>,
    on_retry: Vec<Hook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: Hook) {
        self.list_mut(hook.phase()).push(hook);
    }

    pub fn with(mut self, hook: Hook) -> Self {
        self.add(hook);
        self
    }

    /// Appends every hook of `other` after the existing ones.
    pub fn extend(&mut self, other: &HookSet) {
        self.before_request.extend(other.before_request.iter().cloned());
        self.after_response.extend(other.after_response.iter().cloned());
        self.on_error.extend(other.on_error.iter().cloned());
        self.on_retry.extend(other.on_retry.iter().cloned());
    }

    pub fn hooks(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::BeforeRequest => &self.before_request,
            HookPhase::AfterResponse => &self.after_response,
            HookPhase::OnError => &self.on_error,
            HookPhase::OnRetry => &self.on_retry,
        }
    }

    pub fn len(&self) -> usize {
        self.before_request.len()
            + self.after_response.len()
            + self.on_error.len()
            + self.on_retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn list_mut(&mut self, phase: HookPhase) -> &mut Vec<Hook> {
        match phase {
            HookPhase::BeforeRequest => &mut self.before_request,
            HookPhase::AfterResponse => &mut self.after_response,
            HookPhase::OnError => &mut self.on_error,
            HookPhase::OnRetry => &mut self.on_retry,
        }
    }
}

/// Context handed to `beforeRequest` hooks.
#[derive(Debug)]
pub struct BeforeRequestContext {
    request: PreparedRequest,
    retry_count: u32,
    abort_reason: Option<String>,
}

impl BeforeRequestContext {
    pub(crate) fn new(request: PreparedRequest, retry_count: u32) -> Self {
        Self {
            request,
            retry_count,
            abort_reason: None,
        }
    }

    pub fn request(&self) -> &PreparedRequest {
        &self.request
    }

    pub fn operation(&self) -> Option<&str> {
        self.request.operation.as_deref()
    }

    /// Retries already spent on this logical call.
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn modify_request(&mut self, modification: RequestModification) {
        modification.apply(&mut self.request);
    }

    /// Cancels the call before any network activity. Remaining hooks are skipped.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub(crate) fn into_request(self) -> PreparedRequest {
        self.request
    }
}

/// Context handed to `afterResponse` hooks.
#[derive(Debug)]
pub struct AfterResponseContext {
    request: PreparedRequest,
    response: ResponseEnvelope<Value>,
}

impl AfterResponseContext {
    pub(crate) fn new(request: PreparedRequest, response: ResponseEnvelope<Value>) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &PreparedRequest {
        &self.request
    }

    pub fn response(&self) -> &ResponseEnvelope<Value> {
        &self.response
    }

    pub fn modify_response(&mut self, modification: ResponseModification) {
        modification.apply(&mut self.response);
    }

    pub(crate) fn into_response(self) -> ResponseEnvelope<Value> {
        self.response
    }
}

/// Context handed to `onError` hooks.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    error: ConnectorError,
    request: Option<PreparedRequest>,
    operation: Option<String>,
}

impl ErrorContext {
    pub(crate) fn new(
        error: ConnectorError,
        request: Option<PreparedRequest>,
        operation: Option<String>,
    ) -> Self {
        Self {
            error,
            request,
            operation,
        }
    }

    pub fn error(&self) -> &ConnectorError {
        &self.error
    }

    /// Absent when the failure is not tied to one attempt's request, such as
    /// a failure before preparation or a typed decode after the last attempt.
    pub fn request(&self) -> Option<&PreparedRequest> {
        self.request.as_ref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub(crate) fn into_error(self) -> ConnectorError {
        self.error
    }
}

/// Context handed to `onRetry` hooks.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    operation: Option<String>,
    delay: Duration,
    error: ConnectorError,
}

impl RetryContext {
    pub(crate) fn new(
        attempt: u32,
        operation: Option<String>,
        delay: Duration,
        error: ConnectorError,
    ) -> Self {
        Self {
            attempt,
            operation,
            delay,
            error,
        }
    }

    /// 1-based retry number.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// The failure that triggered this retry.
    pub fn error(&self) -> &ConnectorError {
        &self.error
    }
}

/// Connector hooks merged with per-call hooks, sorted once per call.
pub(crate) struct HookPipeline {
    hooks: HookSet,
}

impl HookPipeline {
    pub(crate) fn merge(connector: &HookSet, per_call: &HookSet) -> Self {
        let mut hooks = connector.clone();
        hooks.extend(per_call);
        for phase in [
            HookPhase::BeforeRequest,
            HookPhase::AfterResponse,
            HookPhase::OnError,
            HookPhase::OnRetry,
        ] {
            hooks.list_mut(phase).sort_by_key(Hook::priority);
        }
        Self { hooks }
    }

    pub(crate) async fn run_before_request(
        &self,
        ctx: &mut BeforeRequestContext,
    ) -> Result<(), ConnectorError> {
        for hook in &self.hooks.before_request {
            if let HookHandler::BeforeRequest(handler) = &hook.handler {
                handler
                    .before_request(ctx)
                    .await
                    .map_err(|error| error.into_connector_error(hook.name()))?;
            }
            if let Some(reason) = &ctx.abort_reason {
                return Err(ConnectorError::cancelled(reason.clone()));
            }
        }
        Ok(())
    }

    pub(crate) async fn run_after_response(
        &self,
        ctx: &mut AfterResponseContext,
    ) -> Result<(), ConnectorError> {
        for hook in &self.hooks.after_response {
            if let HookHandler::AfterResponse(handler) = &hook.handler {
                handler
                    .after_response(ctx)
                    .await
                    .map_err(|error| error.into_connector_error(hook.name()))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn run_on_error(&self, ctx: &ErrorContext) -> Result<(), ConnectorError> {
        for hook in &self.hooks.on_error {
            if let HookHandler::OnError(handler) = &hook.handler {
                handler
                    .on_error(ctx)
                    .await
                    .map_err(|error| error.into_connector_error(hook.name()))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn run_on_retry(&self, ctx: &RetryContext) -> Result<(), ConnectorError> {
        for hook in &self.hooks.on_retry {
            if let HookHandler::OnRetry(handler) = &hook.handler {
                handler
                    .on_retry(ctx)
                    .await
                    .map_err(|error| error.into_connector_error(hook.name()))?;
            }
        }
        Ok(())
    }
}

/// Best-effort tracing of every phase. These hooks never fail.
pub fn logging_hooks() -> HookSet {
    HookSet::new()
        .with(
            Hook::before_request_fn("connectkit.log.request", |ctx| {
                let request = ctx.request();
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    operation = ctx.operation().unwrap_or("-"),
                    retry_count = ctx.retry_count(),
                    "sending request"
                );
                Ok(())
            })
            .with_priority(i32::MIN),
        )
        .with(
            Hook::after_response_fn("connectkit.log.response", |ctx| {
                let response = ctx.response();
                tracing::debug!(
                    status = response.status,
                    duration_ms = response.meta.duration_ms,
                    operation = ctx.request().operation.as_deref().unwrap_or("-"),
                    "received response"
                );
                Ok(())
            })
            .with_priority(i32::MIN),
        )
        .with(
            Hook::on_error_fn("connectkit.log.error", |ctx| {
                let error = ctx.error();
                tracing::warn!(
                    code = %error.code(),
                    source = %error.origin(),
                    status = error.status_code(),
                    retryable = error.retryable(),
                    operation = ctx.operation().unwrap_or("-"),
                    "request failed: {}",
                    error.message()
                );
                Ok(())
            })
            .with_priority(i32::MIN),
        )
        .with(
            Hook::on_retry_fn("connectkit.log.retry", |ctx| {
                tracing::info!(
                    attempt = ctx.attempt(),
                    delay_ms = ctx.delay().as_millis() as u64,
                    operation = ctx.operation().unwrap_or("-"),
                    "retrying request"
                );
                Ok(())
            })
            .with_priority(i32::MIN),
        )
}
