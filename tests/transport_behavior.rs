//! Behavior-driven tests for the transport and retry engine
//!
//! These tests verify HOW a connector drives one logical call through
//! attempts, hooks, retries and failure classification, using the scripted
//! HTTP client so no network is involved.

use connectkit_core::{
    AuthDescriptor, ConnectorBase, ConnectorConfig, ConnectorOptions, ErrorCode, ErrorSource,
    Hook, HookError, HookSet, HttpError, HttpResponse, RateLimitConfig, RequestModification,
    RequestSpec, ResponseModification, RetryConfig, ScriptedHttpClient,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn defaults() -> ConnectorConfig {
    ConnectorConfig::new("https://api.example.test/v1")
}

fn connector(client: &ScriptedHttpClient, options: ConnectorOptions) -> ConnectorBase {
    let mut connector = ConnectorBase::with_http_client(Arc::new(client.clone()));
    connector
        .initialize(defaults(), options, None)
        .expect("valid connector options");
    connector
}

fn record_retries(log: &Arc<Mutex<Vec<(u32, Duration)>>>) -> Hook {
    let log = Arc::clone(log);
    Hook::on_retry_fn("record-retries", move |ctx| {
        log.lock()
            .expect("retry log lock")
            .push((ctx.attempt(), ctx.delay()));
        Ok(())
    })
}

// =============================================================================
// Retry policy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_max_attempts_is_one_a_server_error_is_attempted_once_without_on_retry() {
    // Given: A connector that never retries and a server answering 503
    let client = ScriptedHttpClient::new().respond_json(503, json!({"message": "down"}));
    let retries = Arc::new(Mutex::new(Vec::new()));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .retry(RetryConfig::no_retry())
            .hooks(HookSet::new().with(record_retries(&retries))),
    );

    // When: A request is sent
    let error = connector
        .send_value(&RequestSpec::get("/status"))
        .await
        .expect_err("server error surfaces");

    // Then: Exactly one attempt was made and onRetry never ran
    assert_eq!(client.request_count(), 1);
    assert!(retries.lock().expect("retry log lock").is_empty());
    assert_eq!(error.code(), ErrorCode::ServerError);
    assert_eq!(error.status_code(), Some(503));
    assert!(error.retryable(), "the kind stays retryable even when retries are off");
}

#[tokio::test(start_paused = true)]
async fn when_server_errors_persist_retries_back_off_exponentially_then_surface() {
    // Given: Three 500 responses and the default 500 ms x2 backoff
    let client = ScriptedHttpClient::new()
        .respond_json(500, json!({}))
        .respond_json(500, json!({}))
        .respond_json(500, json!({}));
    let retries = Arc::new(Mutex::new(Vec::new()));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .retry(RetryConfig::exponential(3))
            .hooks(HookSet::new().with(record_retries(&retries))),
    );

    // When: The call is sent
    let started = Instant::now();
    let error = connector
        .send_value(&RequestSpec::get("/reports").with_operation("reports.list"))
        .await
        .expect_err("retries exhausted");

    // Then: Every attempt was used, onRetry saw 1-based attempts with growing delays
    assert_eq!(client.request_count(), 3);
    assert_eq!(error.code(), ErrorCode::ServerError);
    assert_eq!(
        *retries.lock().expect("retry log lock"),
        vec![
            (1, Duration::from_millis(500)),
            (2, Duration::from_millis(1_000)),
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(1_500));
}

#[tokio::test(start_paused = true)]
async fn when_429_carries_retry_after_the_next_attempt_waits_at_least_that_long() {
    // Given: A 429 asking for a 2 second pause, then a success
    let client = ScriptedHttpClient::new()
        .respond(
            HttpResponse::new(429, r#"{"message":"slow down"}"#)
                .with_header("content-type", "application/json")
                .with_header("Retry-After", "2"),
        )
        .respond_json(200, json!({"ok": true}));
    let connector = connector(&client, ConnectorOptions::new());

    // When: The call is sent
    let started = Instant::now();
    let envelope = connector
        .send_value(&RequestSpec::get("/orders"))
        .await
        .expect("second attempt succeeds");

    // Then: The retry honored the server delay and the envelope records one retry
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(client.request_count(), 2);
    assert_eq!(envelope.data, json!({"ok": true}));
    assert_eq!(envelope.meta.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn when_retry_after_is_ignored_the_computed_backoff_is_used() {
    // Given: respectRetryAfter disabled and a 429 asking for 60 seconds
    let client = ScriptedHttpClient::new()
        .respond(HttpResponse::new(429, "").with_header("retry-after", "60"))
        .respond_json(200, json!([]));
    let retries = Arc::new(Mutex::new(Vec::new()));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .retry(RetryConfig {
                respect_retry_after: false,
                initial_delay_ms: 250,
                ..RetryConfig::default()
            })
            .rate_limit(RateLimitConfig {
                adaptive_from_headers: false,
                ..RateLimitConfig::default()
            })
            .hooks(HookSet::new().with(record_retries(&retries))),
    );

    // When: The call is sent
    connector
        .send_value(&RequestSpec::get("/orders"))
        .await
        .expect("retry succeeds");

    // Then: The delay came from the backoff policy
    assert_eq!(
        *retries.lock().expect("retry log lock"),
        vec![(1, Duration::from_millis(250))]
    );
}

#[tokio::test(start_paused = true)]
async fn when_retry_budget_would_be_exceeded_the_error_surfaces_early() {
    // Given: A 700 ms retry budget and backoff of 500 ms then 1000 ms
    let client = ScriptedHttpClient::new()
        .respond_json(503, json!({}))
        .respond_json(503, json!({}))
        .respond_json(503, json!({}));
    let connector = connector(
        &client,
        ConnectorOptions::new().retry(RetryConfig {
            max_attempts: 5,
            retry_budget_ms: Some(700),
            ..RetryConfig::default()
        }),
    );

    // When: The call keeps failing
    let error = connector
        .send_value(&RequestSpec::get("/slow"))
        .await
        .expect_err("budget exhausted");

    // Then: Only the retry that fit the budget was made
    assert_eq!(client.request_count(), 2);
    assert_eq!(error.code(), ErrorCode::ServerError);
}

#[tokio::test(start_paused = true)]
async fn when_client_errors_occur_they_surface_immediately_with_details() {
    // Given: A 422 with a structured body and a request id
    let client = ScriptedHttpClient::new().respond(
        HttpResponse::new(422, r#"{"message":"email is invalid","field":"email"}"#)
            .with_header("content-type", "application/json")
            .with_header("x-request-id", "req-123"),
    );
    let connector = connector(&client, ConnectorOptions::new());

    // When: The call is sent
    let error = connector
        .send_value(&RequestSpec::post("/customers").with_json(json!({"email": "nope"})))
        .await
        .expect_err("invalid request");

    // Then: No retry, and the error is fully classified
    assert_eq!(client.request_count(), 1);
    assert_eq!(error.code(), ErrorCode::InvalidRequest);
    assert_eq!(error.origin(), ErrorSource::Transport);
    assert!(!error.retryable());
    assert_eq!(error.request_id(), Some("req-123"));
    assert!(error.message().contains("email is invalid"));
    assert_eq!(error.details().and_then(|d| d.get("field")), Some(&json!("email")));
}

#[tokio::test(start_paused = true)]
async fn when_the_network_fails_the_error_is_classified_and_retried() {
    // Given: A refused connection followed by a success
    let client = ScriptedHttpClient::new()
        .fail(HttpError::connect("connection refused"))
        .respond_json(200, json!({"id": 1}));
    let connector = connector(&client, ConnectorOptions::new());

    // When: The call is sent
    let envelope = connector
        .send_value(&RequestSpec::get("/items/1"))
        .await
        .expect("recovered");

    // Then: The network failure was retried
    assert_eq!(client.request_count(), 2);
    assert_eq!(envelope.meta.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn when_an_attempt_exceeds_the_timeout_it_fails_as_timeout() {
    // Given: A server that never answers within the 100 ms timeout
    let client = ScriptedHttpClient::new().stall(Duration::from_secs(10));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .timeout_ms(100)
            .retry(RetryConfig::no_retry()),
    );

    // When: The call is sent
    let started = Instant::now();
    let error = connector
        .send_value(&RequestSpec::get("/hang"))
        .await
        .expect_err("timed out");

    // Then: The attempt was cut at the timeout
    assert_eq!(error.code(), ErrorCode::Timeout);
    assert!(error.retryable());
    assert!(started.elapsed() < Duration::from_secs(1));
}

// =============================================================================
// Hooks
// =============================================================================

#[tokio::test]
async fn when_before_request_hooks_have_priorities_the_lowest_runs_first() {
    // Given: Hooks registered with priorities 10 then 1
    let order = Arc::new(Mutex::new(Vec::new()));
    let hook = |label: &'static str, priority: i32| {
        let order = Arc::clone(&order);
        Hook::before_request_fn(label, move |_ctx| {
            order.lock().expect("order lock").push(label);
            Ok(())
        })
        .with_priority(priority)
    };
    let client = ScriptedHttpClient::new().respond_json(200, json!({}));
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(
            HookSet::new()
                .with(hook("priority-10", 10))
                .with(hook("priority-1", 1)),
        ),
    );

    // When: A request is sent
    connector
        .send_value(&RequestSpec::get("/ping"))
        .await
        .expect("success");

    // Then: The priority-1 hook ran first
    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["priority-1", "priority-10"]
    );
}

#[tokio::test]
async fn when_a_hook_aborts_no_request_is_sent_and_on_error_observes_cancelled() {
    // Given: A beforeRequest hook that aborts and an onError recorder
    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let observed = Arc::clone(&observed);
        Hook::on_error_fn("observe", move |ctx| {
            observed
                .lock()
                .expect("observed lock")
                .push((ctx.error().code(), ctx.request().is_some()));
            Ok(())
        })
    };
    let client = ScriptedHttpClient::new();
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(
            HookSet::new()
                .with(Hook::before_request_fn("maintenance", |ctx| {
                    ctx.abort("maintenance window");
                    Ok(())
                }))
                .with(recorder),
        ),
    );

    // When: A request is sent
    let error = connector
        .send_value(&RequestSpec::delete("/customers/1"))
        .await
        .expect_err("aborted");

    // Then: The call was cancelled before any network activity
    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert_eq!(error.origin(), ErrorSource::UserHook);
    assert_eq!(client.request_count(), 0);
    assert_eq!(
        *observed.lock().expect("observed lock"),
        vec![(ErrorCode::Cancelled, true)]
    );
}

#[tokio::test]
async fn when_a_hook_modifies_the_request_the_wire_request_reflects_it() {
    // Given: A per-call hook that adds a header and rewrites the body
    let client = ScriptedHttpClient::new().respond_json(201, json!({"id": 9}));
    let connector = connector(&client, ConnectorOptions::new());
    let spec = RequestSpec::post("/customers")
        .with_json(json!({"name": "Ada"}))
        .with_hook(Hook::before_request_fn("sign", |ctx| {
            ctx.modify_request(
                RequestModification::new()
                    .header("X-Signature", "sig-1")
                    .body(json!({"name": "Ada Lovelace"})),
            );
            Ok(())
        }));

    // When: The request is sent
    connector.send_value(&spec).await.expect("created");

    // Then: The wire request carries the modification
    let sent = &client.requests()[0];
    assert_eq!(
        sent.headers.get("x-signature").map(String::as_str),
        Some("sig-1")
    );
    assert_eq!(sent.body.as_deref(), Some(r#"{"name":"Ada Lovelace"}"#));
}

#[tokio::test]
async fn when_response_hooks_modify_data_the_last_write_wins_and_status_is_kept() {
    // Given: Two afterResponse hooks replacing data in priority order
    let client = ScriptedHttpClient::new().respond_json(200, json!({"items": [1, 2, 3]}));
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(
            HookSet::new()
                .with(
                    Hook::after_response_fn("second", |ctx| {
                        ctx.modify_response(ResponseModification::data(json!("second")));
                        Ok(())
                    })
                    .with_priority(2),
                )
                .with(
                    Hook::after_response_fn("first", |ctx| {
                        let count = ctx.response().data["items"]
                            .as_array()
                            .map_or(0, Vec::len);
                        ctx.modify_response(ResponseModification::data(json!({"count": count})));
                        Ok(())
                    })
                    .with_priority(1),
                ),
        ),
    );

    // When: The request is sent
    let envelope = connector
        .send_value(&RequestSpec::get("/items"))
        .await
        .expect("success");

    // Then: The later hook's data is what the caller sees; status is untouched
    assert_eq!(envelope.data, json!("second"));
    assert_eq!(envelope.status, 200);
}

#[tokio::test(start_paused = true)]
async fn when_a_hook_fails_the_failure_surfaces_as_a_user_hook_error_without_retry() {
    // Given: An afterResponse hook that fails on a retryable-looking code
    let client = ScriptedHttpClient::new()
        .respond_json(200, json!({}))
        .respond_json(200, json!({}));
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(HookSet::new().with(Hook::after_response_fn(
            "schema-check",
            |_ctx| Err(HookError::new("unexpected shape").with_code(ErrorCode::ServerError)),
        ))),
    );

    // When: The request is sent
    let error = connector
        .send_value(&RequestSpec::get("/items"))
        .await
        .expect_err("hook failure");

    // Then: It surfaced immediately as a userHook error
    assert_eq!(client.request_count(), 1);
    assert_eq!(error.origin(), ErrorSource::UserHook);
    assert!(!error.retryable());
    assert!(error.message().contains("schema-check"));
}

// =============================================================================
// Request shaping and response handling
// =============================================================================

#[tokio::test]
async fn when_a_request_is_prepared_defaults_user_agent_and_auth_are_applied() {
    // Given: Defaults, a bearer token and a per-call header
    let client = ScriptedHttpClient::new().respond_json(200, json!({}));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .auth(AuthDescriptor::Bearer {
                token: String::from("secret-token"),
            })
            .default_header("X-Api-Version", "2024-06")
            .default_query("locale", "en"),
    );

    // When: A request is sent
    connector
        .send_value(
            &RequestSpec::get("customers")
                .with_query("status", "active")
                .with_header("X-Api-Version", "2025-01"),
        )
        .await
        .expect("success");

    // Then: The wire request carries merged headers and query
    let sent = &client.requests()[0];
    assert_eq!(
        sent.url,
        "https://api.example.test/v1/customers?locale=en&status=active"
    );
    assert_eq!(
        sent.headers.get("authorization").map(String::as_str),
        Some("Bearer secret-token")
    );
    assert_eq!(
        sent.headers.get("x-api-version").map(String::as_str),
        Some("2025-01")
    );
    assert!(sent
        .headers
        .get("user-agent")
        .is_some_and(|agent| agent.starts_with("connectkit/")));
    assert_eq!(
        sent.headers.get("accept").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test]
async fn when_drop_nulls_is_enabled_null_properties_are_removed() {
    // Given: A body with null properties at several depths
    let client = ScriptedHttpClient::new().respond_json(
        200,
        json!({"id": 1, "email": null, "address": {"city": "Oslo", "zip": null}}),
    );
    let connector = connector(&client, ConnectorOptions::new().drop_nulls(true));

    // When: The response arrives
    let envelope = connector
        .send_value(&RequestSpec::get("/customers/1"))
        .await
        .expect("success");

    // Then: Only non-null properties remain
    assert_eq!(envelope.data, json!({"id": 1, "address": {"city": "Oslo"}}));
}

#[tokio::test]
async fn when_the_payload_does_not_match_the_type_a_parsing_error_is_raised() {
    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Customer {
        id: u64,
    }

    // Given: A body whose id is a string
    let client = ScriptedHttpClient::new().respond(
        HttpResponse::ok_json(r#"{"id":"abc"}"#).with_header("request-id", "req-7"),
    );
    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let observed = Arc::clone(&observed);
        Hook::on_error_fn("observe", move |ctx| {
            observed
                .lock()
                .expect("observed lock")
                .push((ctx.error().code(), ctx.operation().map(str::to_owned)));
            Ok(())
        })
    };
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(HookSet::new().with(recorder)),
    );

    // When: A typed send decodes it
    let error = connector
        .send::<Customer>(&RequestSpec::get("/customers/abc").with_operation("customers.get"))
        .await
        .expect_err("shape mismatch");

    // Then: It is a non-retryable deserialize failure carrying the request id
    assert_eq!(error.code(), ErrorCode::ParsingError);
    assert_eq!(error.origin(), ErrorSource::Deserialize);
    assert!(!error.retryable());
    assert_eq!(error.request_id(), Some("req-7"));

    // And: onError hooks saw the decode failure exactly once
    assert_eq!(
        *observed.lock().expect("observed lock"),
        vec![(ErrorCode::ParsingError, Some(String::from("customers.get")))]
    );
}

#[tokio::test]
async fn when_an_on_error_hook_fails_on_a_decode_failure_the_hook_error_surfaces() {
    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Customer {
        id: u64,
    }

    // Given: A mismatched body and an onError hook that fails
    let client = ScriptedHttpClient::new().respond_json(200, json!({"id": "abc"}));
    let connector = connector(
        &client,
        ConnectorOptions::new().hooks(HookSet::new().with(Hook::on_error_fn(
            "alerting",
            |_| Err(HookError::new("alert sink unavailable")),
        ))),
    );

    // When: A typed send decodes it
    let error = connector
        .send::<Customer>(&RequestSpec::get("/customers/abc"))
        .await
        .expect_err("hook failure");

    // Then: The hook's failure replaced the decode failure
    assert_eq!(error.origin(), ErrorSource::UserHook);
    assert!(!error.retryable());
}

#[tokio::test]
async fn when_rate_limit_headers_arrive_they_are_exposed_in_meta() {
    // Given: A response carrying conventional rate-limit headers
    let client = ScriptedHttpClient::new().respond(
        HttpResponse::ok_json("[]")
            .with_header("x-ratelimit-limit", "100")
            .with_header("x-ratelimit-remaining", "42")
            .with_header("x-ratelimit-reset", "1700000000"),
    );
    let connector = connector(&client, ConnectorOptions::new());

    // When: The response arrives
    let envelope = connector
        .send_value(&RequestSpec::get("/items"))
        .await
        .expect("success");

    // Then: The snapshot is in the envelope metadata
    let rate_limit = envelope.meta.rate_limit.expect("rate limit snapshot");
    assert_eq!(rate_limit.limit, Some(100));
    assert_eq!(rate_limit.remaining, Some(42));
    assert_eq!(rate_limit.reset, Some(1_700_000_000));
    assert_eq!(rate_limit.retry_after_seconds, None);
    assert_eq!(envelope.data, Value::Array(Vec::new()));
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn when_a_refreshable_token_is_rejected_it_is_refreshed_once_and_the_call_succeeds() {
    // Given: An OAuth2 connector whose cached token the API rejects
    let client = ScriptedHttpClient::new()
        .respond_json(401, json!({"message": "token expired"}))
        .respond_json(200, json!({"access_token": "fresh", "expires_in": 3600}))
        .respond_json(200, json!({"id": 5}));
    let connector = connector(
        &client,
        ConnectorOptions::new()
            .retry(RetryConfig::no_retry())
            .auth(AuthDescriptor::OAuth2 {
                client_id: String::from("client"),
                client_secret: String::from("secret"),
                refresh_token: String::from("refresh"),
                access_token: Some(String::from("stale")),
                expires_at: None,
                token_url: Some(String::from("https://auth.example.test/token")),
            }),
    );

    // When: A request is sent
    let envelope = connector
        .send_value(&RequestSpec::get("/me"))
        .await
        .expect("refreshed call succeeds");

    // Then: The token endpoint was hit between the two API attempts
    let requests = client.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer stale")
    );
    assert_eq!(requests[1].url, "https://auth.example.test/token");
    assert_eq!(
        requests[2].headers.get("authorization").map(String::as_str),
        Some("Bearer fresh")
    );
    assert_eq!(envelope.meta.retry_count, 0);
}

#[tokio::test]
async fn when_static_credentials_are_rejected_auth_failed_surfaces_without_retry() {
    // Given: A bearer token the API rejects
    let client = ScriptedHttpClient::new().respond_json(401, json!({}));
    let connector = connector(
        &client,
        ConnectorOptions::new().auth(AuthDescriptor::Bearer {
            token: String::from("revoked"),
        }),
    );

    // When: A request is sent
    let error = connector
        .send_value(&RequestSpec::get("/me"))
        .await
        .expect_err("rejected");

    // Then: No refresh or retry happened
    assert_eq!(client.request_count(), 1);
    assert_eq!(error.code(), ErrorCode::AuthFailed);
    assert_eq!(error.origin(), ErrorSource::Auth);
}

#[tokio::test]
async fn when_retry_after_is_too_large_to_represent_it_is_ignored() {
    // Given: A successful response with an absurd Retry-After value
    let client = ScriptedHttpClient::new()
        .respond(HttpResponse::ok_json("{}").with_header("retry-after", "1e300"))
        .respond(
            HttpResponse::ok_json("{}").with_header("retry-after", "99999999999999999999"),
        );
    let connector = connector(
        &client,
        ConnectorOptions::new().rate_limit(RateLimitConfig::per_second(5.0)),
    );

    // When: Both responses arrive
    for _ in 0..2 {
        let envelope = connector
            .send_value(&RequestSpec::get("/items"))
            .await
            .expect("success");

        // Then: The call succeeds and no retry-after hint is reported
        assert_eq!(envelope.meta.rate_limit, None);
    }

    // And: The limiter was not suspended
    let state = connector
        .transport()
        .expect("initialized")
        .rate_limiter()
        .expect("limiter installed")
        .state();
    assert_eq!(state.suspended_until, None);
}
