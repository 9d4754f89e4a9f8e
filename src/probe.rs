//! API probe: direct HTTP checks against the backend, independent of any
//! browser session.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, Method as ReqMethod};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::{join_url, DEFAULT_API_URL, DEFAULT_TIMEOUT_MS};
use crate::error::StepError;
use crate::model::{EndpointSpec, HttpMethod};
use crate::validator::validate_shape;

/// Outcome of one probe. `error` is `None` iff the check passed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub method: HttpMethod,
    pub url: String,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<StepError>,
}

impl ProbeResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    /// Details recorded on the step result.
    pub fn detail(&self) -> Value {
        json!({
            "method": self.method.to_string(),
            "url": self.url,
            "status": self.status,
            "latencyMs": self.latency_ms,
        })
    }
}

pub struct ApiProbe {
    client: Client,
    api_url: String,
    default_timeout: Duration,
    headers: HashMap<String, String>,
}

impl Default for ApiProbe {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl ApiProbe {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_url)
    }

    pub fn with_client(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            headers: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Headers sent with every request; per-endpoint headers win.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_method(method: HttpMethod) -> ReqMethod {
        match method {
            HttpMethod::Get => ReqMethod::GET,
            HttpMethod::Post => ReqMethod::POST,
            HttpMethod::Put => ReqMethod::PUT,
            HttpMethod::Delete => ReqMethod::DELETE,
            HttpMethod::Patch => ReqMethod::PATCH,
            HttpMethod::Head => ReqMethod::HEAD,
            HttpMethod::Options => ReqMethod::OPTIONS,
        }
    }

    /// Issue one request and validate status, then body shape.
    ///
    /// Transport failures and mismatches are reported in the result; only
    /// an unusable URL is an `Err`.
    #[instrument(skip(self, spec), fields(url = %spec.url, method = %spec.method))]
    pub async fn check(&self, spec: &EndpointSpec) -> Result<ProbeResult> {
        let url = join_url(&self.api_url, &spec.url)?;
        let timeout = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut request = self
            .client
            .request(Self::convert_method(spec.method), &url)
            .timeout(timeout);

        for (name, value) in &self.headers {
            if !spec.headers.contains_key(name) {
                request = request.header(name, value);
            }
        }
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let mut result = ProbeResult {
            method: spec.method,
            url: url.clone(),
            status: None,
            latency_ms: 0,
            error: None,
        };

        debug!("Sending request to {}", url);
        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                result.latency_ms = start.elapsed().as_millis() as u64;
                result.error = Some(transport_error(&url, timeout, &e));
                return Ok(result);
            }
        };

        let status = response.status().as_u16();
        result.status = Some(status);
        debug!("Received response with status: {}", status);

        if status != spec.expected_status {
            result.latency_ms = start.elapsed().as_millis() as u64;
            result.error = Some(StepError::UnexpectedStatus {
                expected: spec.expected_status,
                actual: status,
            });
            return Ok(result);
        }

        let body = response.text().await;
        result.latency_ms = start.elapsed().as_millis() as u64;

        let Some(shape) = &spec.body_shape else {
            return Ok(result);
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                result.error = Some(transport_error(&url, timeout, &e));
                return Ok(result);
            }
        };

        let problems = validate_shape(&body, shape);
        if !problems.is_empty() {
            result.error = Some(StepError::BodyShapeMismatch {
                reason: problems.join("; "),
            });
        }
        Ok(result)
    }
}

fn transport_error(url: &str, timeout: Duration, err: &reqwest::Error) -> StepError {
    if err.is_timeout() {
        StepError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        // Connection resets and DNS failures land here too; every one of
        // them means the API is unreachable.
        StepError::ConnectionRefused {
            url: url.to_string(),
            message: error_chain(err),
        }
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_camel_cased() {
        let result = ProbeResult {
            method: HttpMethod::Get,
            url: "http://localhost:8000/health".into(),
            status: Some(200),
            latency_ms: 12,
            error: None,
        };
        assert!(result.ok());
        let detail = result.detail();
        assert_eq!(detail["method"], "GET");
        assert_eq!(detail["status"], 200);
        assert_eq!(detail["latencyMs"], 12);
    }

    #[tokio::test]
    async fn invalid_base_url_is_an_error() {
        let probe = ApiProbe::new("not a url");
        assert!(probe.check(&EndpointSpec::get("/health")).await.is_err());
    }
}
