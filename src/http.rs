use crate::redact::loggable_body;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct ReqParam {
    pub key: String,
    pub value: String,
}

impl ReqParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ReqParam {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug)]
pub enum ReqBody {
    /// `application/x-www-form-urlencoded`
    Form(Vec<ReqParam>),
    /// `application/json`
    Json(Value),
}

#[derive(Debug)]
pub struct Endpoint {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<ReqParam>,
}

impl Endpoint {
    pub fn post(url: Url) -> Self {
        Endpoint {
            method: Method::POST,
            url,
            headers: vec![],
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(ReqParam::new(key, value));
        self
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    pub endpoint: Endpoint,
    pub req_body: ReqBody,
}

impl HttpRequest {
    pub fn new(endpoint: Endpoint, req_body: ReqBody) -> HttpRequest {
        HttpRequest { endpoint, req_body }
    }
}

#[derive(Debug)]
pub struct HttpResult {
    pub body: String,
    pub status_code: u16,
}

#[derive(Clone, Debug)]
pub enum HttpError {
    Status {
        status_code: u16,
        kind: StatusError,
        /// Positive `Retry-After` delay, seconds form only.
        retry_after: Option<Duration>,
    },
    Timeout(String),
    Io(String),
}

impl HttpError {
    pub fn get_message(&self) -> String {
        match self {
            HttpError::Status { kind, .. } => match kind {
                StatusError::ClientError(msg) => msg.to_string(),
                StatusError::ServerError(msg) => msg.to_string(),
            },
            HttpError::Timeout(msg) => msg.to_string(),
            HttpError::Io(msg) => msg.to_string(),
        }
    }

    /// 429, any 5xx, or a timeout.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Status { status_code, .. } => *status_code == 429 || *status_code >= 500,
            HttpError::Timeout(_) => true,
            HttpError::Io(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::Status { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short description for results and logs.
    pub fn summary(&self) -> String {
        match self {
            HttpError::Status { status_code, .. } => format!("HTTP {status_code}"),
            HttpError::Timeout(_) => "Timeout".to_string(),
            HttpError::Io(msg) => msg.to_string(),
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HttpError::Timeout(error.to_string())
        } else {
            HttpError::Io(error.to_string())
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum StatusError {
    ClientError(String),
    ServerError(String),
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResult, HttpError> {
        let req = self.build_reqwest(request)?;
        let response = req.send().await?;
        let status_code = response.status();
        debug!(status = status_code.as_u16(), "http request executed");
        if status_code.is_success() {
            // Success is decided by the status line; an unreadable body reads as empty.
            let body = response.text().await.unwrap_or_else(|e| {
                debug!(error = %e, "failed to read response body");
                String::new()
            });
            Ok(HttpResult {
                body,
                status_code: status_code.as_u16(),
            })
        } else {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!(
                status = status_code.as_u16(),
                body = %loggable_body(&body),
                "http request failed"
            );
            let kind = if status_code.is_client_error() {
                StatusError::ClientError(body)
            } else {
                StatusError::ServerError(body)
            };
            Err(HttpError::Status {
                status_code: status_code.as_u16(),
                kind,
                retry_after,
            })
        }
    }

    fn build_reqwest(&self, request: HttpRequest) -> Result<RequestBuilder, HttpError> {
        let endpoint = request.endpoint;
        debug!(method = %endpoint.method, url = %endpoint.url, "executing http request");

        let mut headers = HeaderMap::new();
        for header in &endpoint.headers {
            let name = HeaderName::from_bytes(header.key.as_bytes())
                .map_err(|e| HttpError::Io(format!("invalid header name {}: {e}", header.key)))?;
            let value = HeaderValue::from_str(&header.value)
                .map_err(|e| HttpError::Io(format!("invalid value for header {}: {e}", header.key)))?;
            headers.insert(name, value);
        }

        let req = self
            .client
            .request(endpoint.method, endpoint.url)
            .headers(headers);

        Ok(match request.req_body {
            ReqBody::Form(params) => {
                let pairs: Vec<(String, String)> =
                    params.into_iter().map(|p| (p.key, p.value)).collect();
                req.form(&pairs)
            }
            ReqBody::Json(value) => req.json(&value),
        })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
}
