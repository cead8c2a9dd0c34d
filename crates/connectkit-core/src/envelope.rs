use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::ConnectorError;
use crate::rate_limit::RateLimitInfo;

/// Uniform success result returned by `send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub data: T,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub meta: ResponseMeta,
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Retries spent before this attempt succeeded.
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ResponseMeta {
    pub fn new(duration_ms: u64, retry_count: u32) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            duration_ms,
            request_id: None,
            retry_count,
            rate_limit: None,
        }
    }
}

impl<T> ResponseEnvelope<T> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            data: f(self.data),
            status: self.status,
            headers: self.headers,
            meta: self.meta,
        }
    }
}

impl ResponseEnvelope<Value> {
    /// Deserializes `data` into the caller's payload type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ResponseEnvelope<T>, ConnectorError> {
        let ResponseEnvelope {
            data,
            status,
            headers,
            meta,
        } = self;
        let data = serde_json::from_value(data).map_err(|error| {
            let mut error = ConnectorError::parsing(format!(
                "response body does not match the expected shape: {error}"
            ));
            if let Some(request_id) = &meta.request_id {
                error = error.with_request_id(request_id.clone());
            }
            error
        })?;

        Ok(ResponseEnvelope {
            data,
            status,
            headers,
            meta,
        })
    }
}

/// Field-wise replacement requested by an `afterResponse` hook.
///
/// When several hooks modify the same response, the last write to each field
/// wins. `status` and `headers` are not modifiable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseModification {
    pub data: Option<Value>,
    pub meta: Option<ResponseMeta>,
}

impl ResponseModification {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            meta: None,
        }
    }

    pub fn meta(meta: ResponseMeta) -> Self {
        Self {
            data: None,
            meta: Some(meta),
        }
    }

    pub(crate) fn apply(self, envelope: &mut ResponseEnvelope<Value>) {
        if let Some(data) = self.data {
            envelope.data = data;
        }
        if let Some(meta) = self.meta {
            envelope.meta = meta;
        }
    }
}
