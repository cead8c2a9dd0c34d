use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::ConnectorError;
use crate::hooks::{Hook, HookSet};
use crate::http_client::{HttpMethod, HttpRequest};

/// One logical call issued by resource-level code.
///
/// A `RequestSpec` is never mutated by the runtime; each attempt prepares a
/// fresh [`PreparedRequest`] from it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Correlation tag surfaced to hooks and logs, e.g. `customers.list`.
    pub operation: Option<String>,
    /// Hooks merged with the connector's hooks for this call only.
    pub hooks: HookSet,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            operation: None,
            hooks: HookSet::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Appends a query parameter, keeping any existing value for the same key.
    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Sets a query parameter, replacing every existing value for the key.
    pub fn set_query(&mut self, name: &str, value: impl ToString) {
        self.query.retain(|(key, _)| key != name);
        self.query.push((name.to_owned(), value.to_string()));
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_body<T: Serialize>(self, body: &T) -> Result<Self, ConnectorError> {
        let value = serde_json::to_value(body).map_err(|error| {
            ConnectorError::invalid_config(format!("request body is not serializable: {error}"))
        })?;
        Ok(self.with_json(value))
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hooks.add(hook);
        self
    }
}

/// Fully resolved request for one attempt, as seen by hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub operation: Option<String>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub(crate) fn to_http_request(&self, timeout_ms: u64) -> HttpRequest {
        let mut request =
            HttpRequest::new(self.method, self.url.clone()).with_timeout_ms(timeout_ms);
        request.headers = self.headers.clone();
        if let Some(body) = &self.body {
            request
                .headers
                .entry(String::from("content-type"))
                .or_insert_with(|| String::from("application/json"));
            request.body = Some(body.to_string());
        }
        request
    }
}

/// Changes a `beforeRequest` hook asks for. Unset fields are left alone;
/// headers are merged over the existing ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestModification {
    pub method: Option<HttpMethod>,
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl RequestModification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub(crate) fn apply(self, request: &mut PreparedRequest) {
        if let Some(method) = self.method {
            request.method = method;
        }
        if let Some(url) = self.url {
            request.url = url;
        }
        request.headers.extend(self.headers);
        if let Some(body) = self.body {
            request.body = Some(body);
        }
    }
}
