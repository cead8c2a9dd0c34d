//! Attempt-cycle engine behind every `send`.
//!
//! One logical call runs as a sequence of strictly sequential attempts:
//!
//! 1. acquire a rate-limit slot
//! 2. prepare the request (URL join, defaults, user agent, credentials)
//! 3. run `beforeRequest` hooks
//! 4. perform the exchange under the per-attempt timeout
//! 5. on success build the envelope, run `afterResponse`, return
//! 6. on failure run `onError`, then retry, refresh credentials, or propagate

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::auth::AuthStrategy;
use crate::config::ConnectorConfig;
use crate::envelope::{ResponseEnvelope, ResponseMeta};
use crate::error::{ConnectorError, ErrorCode, ErrorSource};
use crate::hooks::{
    AfterResponseContext, BeforeRequestContext, ErrorContext, HookPipeline, RetryContext,
};
use crate::http_client::{HttpClient, HttpResponse};
use crate::normalize::drop_nulls;
use crate::rate_limit::{RateLimitInfo, RateLimiter};
use crate::request::{PreparedRequest, RequestSpec};
use crate::retry::parse_retry_after;

const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "request-id"];

/// Shared transport of one connector instance.
pub struct Transport {
    config: Arc<ConnectorConfig>,
    client: Arc<dyn HttpClient>,
    auth: Option<Arc<dyn AuthStrategy>>,
    limiter: Option<Arc<RateLimiter>>,
}

/// A failed attempt together with the request it was running, if any.
struct AttemptFailure {
    error: ConnectorError,
    request: Option<PreparedRequest>,
}

impl AttemptFailure {
    fn before_send(error: ConnectorError) -> Self {
        Self {
            error,
            request: None,
        }
    }

    fn during(error: ConnectorError, request: &PreparedRequest) -> Self {
        Self {
            error,
            request: Some(request.clone()),
        }
    }
}

impl Transport {
    pub fn new(
        config: ConnectorConfig,
        client: Arc<dyn HttpClient>,
        auth: Option<Arc<dyn AuthStrategy>>,
    ) -> Self {
        let limiter = RateLimiter::from_config(&config.rate_limit).map(Arc::new);

        Self {
            config: Arc::new(config),
            client,
            auth,
            limiter,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The installed limiter; `None` when `requestsPerSecond` is zero.
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_deref()
    }

    /// Runs one logical call to completion, retrying per the retry policy.
    pub async fn execute(
        &self,
        spec: &RequestSpec,
    ) -> Result<ResponseEnvelope<Value>, ConnectorError> {
        let pipeline = HookPipeline::merge(&self.config.hooks, &spec.hooks);
        let retry = &self.config.retry;
        let started = Instant::now();
        let mut retries = 0_u32;
        let mut refreshed = false;

        loop {
            let failure = match self.attempt(spec, &pipeline, retries).await {
                Ok(envelope) => return Ok(envelope),
                Err(failure) => failure,
            };
            let mut error = failure.error;

            if !refreshed && self.should_refresh(&error) {
                refreshed = true;
                if let Some(auth) = &self.auth {
                    tracing::info!(
                        operation = spec.operation.as_deref().unwrap_or("-"),
                        "credentials rejected; refreshing before re-attempt"
                    );
                    let rejected = failure
                        .request
                        .as_ref()
                        .map(|request| request.headers.clone())
                        .unwrap_or_default();
                    match auth.refresh(&rejected).await {
                        Ok(_) => continue,
                        Err(refresh_error) => error = refresh_error,
                    }
                }
            }

            let ctx = ErrorContext::new(error, failure.request, spec.operation.clone());
            pipeline.run_on_error(&ctx).await?;
            let error = ctx.error().clone();

            let attempts_made = retries + 1;
            if !error.retryable() || attempts_made >= retry.max_attempts {
                if error.retryable() {
                    tracing::warn!(
                        operation = spec.operation.as_deref().unwrap_or("-"),
                        attempts = attempts_made,
                        code = %error.code(),
                        "giving up after exhausting retry attempts"
                    );
                }
                return Err(error);
            }

            let delay = retry.delay_for(attempts_made, error.retry_after());
            if let Some(budget) = retry.retry_budget() {
                if started.elapsed() + delay > budget {
                    tracing::warn!(
                        operation = spec.operation.as_deref().unwrap_or("-"),
                        budget_ms = budget.as_millis() as u64,
                        delay_ms = delay.as_millis() as u64,
                        "retry budget exhausted"
                    );
                    return Err(error);
                }
            }

            retries += 1;
            tracing::info!(
                operation = spec.operation.as_deref().unwrap_or("-"),
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                code = %error.code(),
                "scheduling retry"
            );
            let ctx = RetryContext::new(retries, spec.operation.clone(), delay, error);
            pipeline.run_on_retry(&ctx).await?;
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs one call and decodes `data` into `T`.
    ///
    /// A body that does not match `T` is reported to `onError` hooks like
    /// any other failure of the call.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
    ) -> Result<ResponseEnvelope<T>, ConnectorError> {
        match self.execute(spec).await?.decode() {
            Ok(envelope) => Ok(envelope),
            Err(error) => Err(self.report_failure(spec, error).await),
        }
    }

    /// Runs `onError` hooks for a failure raised after the attempt cycle
    /// finished. Returns the error the caller should see.
    pub(crate) async fn report_failure(
        &self,
        spec: &RequestSpec,
        error: ConnectorError,
    ) -> ConnectorError {
        let pipeline = HookPipeline::merge(&self.config.hooks, &spec.hooks);
        let ctx = ErrorContext::new(error, None, spec.operation.clone());
        match pipeline.run_on_error(&ctx).await {
            Ok(()) => ctx.into_error(),
            Err(hook_error) => hook_error,
        }
    }

    fn should_refresh(&self, error: &ConnectorError) -> bool {
        error.status_code() == Some(401)
            && self.auth.as_ref().is_some_and(|auth| auth.can_refresh())
    }

    async fn attempt(
        &self,
        spec: &RequestSpec,
        pipeline: &HookPipeline,
        retry_count: u32,
    ) -> Result<ResponseEnvelope<Value>, AttemptFailure> {
        if let Some(limiter) = &self.limiter {
            limiter.wait_for_slot().await;
        }

        let prepared = self
            .prepare(spec)
            .await
            .map_err(AttemptFailure::before_send)?;
        let mut ctx = BeforeRequestContext::new(prepared, retry_count);
        if let Err(error) = pipeline.run_before_request(&mut ctx).await {
            let request = ctx.into_request();
            return Err(AttemptFailure::during(error, &request));
        }
        let request = ctx.into_request();

        let attempt_started = Instant::now();
        let response = self
            .perform(&request)
            .await
            .map_err(|error| AttemptFailure::during(error, &request))?;
        let duration_ms = attempt_started.elapsed().as_millis() as u64;

        let rate_limit = RateLimitInfo::from_headers(&response.headers);
        if let (Some(limiter), Some(info)) = (&self.limiter, &rate_limit) {
            if self.config.rate_limit.adaptive_from_headers {
                limiter.update_from_response(info);
            }
        }
        let request_id = REQUEST_ID_HEADERS
            .iter()
            .find_map(|name| response.header(name))
            .map(str::to_owned);

        if !response.is_success() {
            let error = status_error(&request, &response, request_id);
            return Err(AttemptFailure::during(error, &request));
        }
        let mut data = parse_body(&response).map_err(|mut error| {
            if let Some(request_id) = &request_id {
                error = error.with_request_id(request_id.clone());
            }
            AttemptFailure::during(error, &request)
        })?;
        if self.config.drop_nulls {
            let removed = drop_nulls(&mut data);
            if removed > 0 {
                tracing::debug!(
                    removed,
                    operation = request.operation.as_deref().unwrap_or("-"),
                    "dropped null properties from response body"
                );
            }
        }

        let mut meta = ResponseMeta::new(duration_ms, retry_count);
        meta.request_id = request_id;
        meta.rate_limit = rate_limit;
        let envelope = ResponseEnvelope {
            data,
            status: response.status,
            headers: response.headers,
            meta,
        };

        let mut ctx = AfterResponseContext::new(request, envelope);
        if let Err(error) = pipeline.run_after_response(&mut ctx).await {
            let request = ctx.request().clone();
            return Err(AttemptFailure::during(error, &request));
        }
        Ok(ctx.into_response())
    }

    async fn perform(&self, request: &PreparedRequest) -> Result<HttpResponse, ConnectorError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let exchange = self
            .client
            .execute(request.to_http_request(self.config.timeout_ms));

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome.map_err(|error| ConnectorError::from_http_error(&error)),
            Err(_) => Err(ConnectorError::new(
                ErrorCode::Timeout,
                ErrorSource::Transport,
                format!(
                    "{} {} timed out after {} ms",
                    request.method, request.url, self.config.timeout_ms
                ),
            )),
        }
    }

    async fn prepare(&self, spec: &RequestSpec) -> Result<PreparedRequest, ConnectorError> {
        let url = build_url(&self.config, spec)?;

        let mut headers = self.config.default_headers.clone();
        headers.insert(String::from("user-agent"), self.config.user_agent.clone());
        headers
            .entry(String::from("accept"))
            .or_insert_with(|| String::from("application/json"));
        headers.extend(
            spec.headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.clone())),
        );
        if let Some(auth) = &self.auth {
            auth.apply(&mut headers).await?;
        }

        Ok(PreparedRequest {
            method: spec.method,
            url,
            headers,
            body: spec.body.clone(),
            operation: spec.operation.clone(),
        })
    }
}

/// Joins the base URL and path, then appends default and per-call query
/// parameters. Per-call parameters replace defaults with the same name.
fn build_url(config: &ConnectorConfig, spec: &RequestSpec) -> Result<String, ConnectorError> {
    let raw = if spec.path.starts_with("http://") || spec.path.starts_with("https://") {
        spec.path.clone()
    } else {
        format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            spec.path.trim_start_matches('/')
        )
    };

    let mut url = reqwest::Url::parse(&raw).map_err(|error| {
        ConnectorError::new(
            ErrorCode::InvalidRequest,
            ErrorSource::Application,
            format!("cannot build request URL '{raw}': {error}"),
        )
    })?;

    let defaults = config
        .default_query_params
        .iter()
        .filter(|(name, _)| !spec.query.iter().any(|(key, _)| key == *name))
        .map(|(name, value)| (name.as_str(), value.as_str()));
    let per_call = spec
        .query
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()));
    let pairs: Vec<_> = defaults.chain(per_call).collect();

    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(url.into())
}

fn parse_body(response: &HttpResponse) -> Result<Value, ConnectorError> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }

    match serde_json::from_str(&response.body) {
        Ok(value) => Ok(value),
        Err(error) if claims_json(response) => Err(ConnectorError::parsing(format!(
            "response declared JSON but could not be parsed: {error}"
        ))),
        Err(_) => Ok(Value::String(response.body.clone())),
    }
}

fn claims_json(response: &HttpResponse) -> bool {
    response
        .header("content-type")
        .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("json"))
}

fn status_error(
    request: &PreparedRequest,
    response: &HttpResponse,
    request_id: Option<String>,
) -> ConnectorError {
    let details = serde_json::from_str::<Value>(&response.body)
        .ok()
        .or_else(|| {
            let body = response.body.trim();
            (!body.is_empty()).then(|| Value::String(body.to_owned()))
        });

    let upstream_message = details.as_ref().and_then(|details| {
        details
            .get("message")
            .or_else(|| details.get("error").and_then(|error| error.get("message")))
            .or_else(|| details.get("error"))
            .and_then(Value::as_str)
    });
    let message = match upstream_message {
        Some(upstream) => format!(
            "{} {} returned HTTP {}: {upstream}",
            request.method, request.url, response.status
        ),
        None => format!(
            "{} {} returned HTTP {}",
            request.method, request.url, response.status
        ),
    };

    let mut error = ConnectorError::from_status(response.status, message);
    if let Some(details) = details {
        error = error.with_details(details);
    }
    if let Some(request_id) = request_id {
        error = error.with_request_id(request_id);
    }
    if let Some(retry_after) = response.header("retry-after").and_then(parse_retry_after) {
        error = error.with_retry_after(retry_after);
    }
    error
}
