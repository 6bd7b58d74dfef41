use crate::cancel::Cancellation;
use crate::config::{AquaOptions, HttpOptions};
use crate::error::{ImportError, ImportResult};
use crate::http::{ApiClient, Endpoint, HttpError, HttpRequest, HttpResult, ReqBody, ReqParam};
use crate::redact::loggable_body;
use crate::submission::model::{batch_payload, ExecutionRequest, SubmitResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;

const MAX_BACKOFF_SECONDS: u64 = 30;

#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Posts one scenario group. Transport and status failures are reported in the
    /// result; authentication failures and cancellation are errors.
    async fn submit(
        &self,
        executions: &[ExecutionRequest],
        cancel: &Cancellation,
    ) -> ImportResult<SubmitResult>;
}

pub struct AquaClient {
    api: ApiClient,
    token_url: Url,
    execution_url: Url,
    username: Option<String>,
    password: Option<String>,
    attempts: u32,
    token: OnceCell<String>,
}

impl AquaClient {
    /// Builds a client for an `https` base URL.
    pub fn new(aqua: &AquaOptions, http: &HttpOptions) -> ImportResult<Self> {
        let raw = aqua
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ImportError::config("Aqua base URL is required"))?;
        let base_url = normalize_base_url(raw)?;
        if base_url.scheme() != "https" {
            return Err(ImportError::config(format!(
                "Aqua base URL must be an https URL, got {raw}"
            )));
        }
        Self::with_base_url(base_url, aqua, http)
    }

    /// No scheme check, so tests can point the client at a local mock server.
    pub(crate) fn with_base_url(
        base_url: Url,
        aqua: &AquaOptions,
        http: &HttpOptions,
    ) -> ImportResult<Self> {
        let join = |path: &str| {
            base_url
                .join(path)
                .map_err(|e| ImportError::config(format!("invalid Aqua URL for {path}: {e}")))
        };
        let api = ApiClient::new(Duration::from_secs(http.timeout_seconds.max(1) as u64)).map_err(
            |e| ImportError::config(format!("failed to build HTTP client: {}", e.get_message())),
        )?;
        Ok(AquaClient {
            api,
            token_url: join("api/token")?,
            execution_url: join("api/TestExecution")?,
            username: aqua.username.clone(),
            password: aqua.password.clone(),
            attempts: http.retries.max(1) as u32,
            token: OnceCell::new(),
        })
    }

    async fn bearer_token(&self, cancel: &Cancellation) -> ImportResult<&str> {
        self.token
            .get_or_try_init(|| self.authenticate(cancel))
            .await
            .map(String::as_str)
    }

    async fn authenticate(&self, cancel: &Cancellation) -> ImportResult<String> {
        let username = non_blank(self.username.as_deref());
        let password = non_blank(self.password.as_deref());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(ImportError::authentication("Aqua credentials are required"));
        };

        let request = HttpRequest::new(
            Endpoint::post(self.token_url.clone()),
            ReqBody::Form(vec![
                ReqParam::new("grant_type", "password"),
                ReqParam::new("username", username),
                ReqParam::new("password", password),
            ]),
        );
        let response = match self.execute(request, cancel).await? {
            Ok(response) => response,
            Err(e) => {
                error!(
                    status = ?e.status_code(),
                    body = %loggable_body(&e.get_message()),
                    "authentication failed"
                );
                return Err(ImportError::authentication(format!(
                    "token request failed: {}",
                    e.summary()
                )));
            }
        };

        let token = extract_token(&response.body).ok_or_else(|| {
            ImportError::authentication("authentication response did not contain a bearer token")
        })?;
        debug!("obtained bearer token");
        Ok(token)
    }

    /// Runs one exchange unless cancellation arrives first.
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &Cancellation,
    ) -> ImportResult<Result<HttpResult, HttpError>> {
        tokio::select! {
            result = self.api.execute(request) => Ok(result),
            _ = cancel.cancelled() => Err(ImportError::Cancelled),
        }
    }

    fn submission_request(&self, token: &str, payload: &Value) -> HttpRequest {
        HttpRequest::new(
            Endpoint::post(self.execution_url.clone())
                .with_header("Authorization", format!("Bearer {token}")),
            ReqBody::Json(payload.clone()),
        )
    }
}

#[async_trait]
impl SubmissionClient for AquaClient {
    async fn submit(
        &self,
        executions: &[ExecutionRequest],
        cancel: &Cancellation,
    ) -> ImportResult<SubmitResult> {
        let count = executions.len();
        if count == 0 {
            return Ok(SubmitResult::posted(0));
        }

        cancel.check()?;
        let token = self.bearer_token(cancel).await?;
        let payload = match serde_json::to_value(batch_payload(executions)) {
            Ok(payload) => payload,
            Err(e) => return Ok(SubmitResult::failed(count, format!("invalid payload: {e}"))),
        };

        let attempts = self.attempts;
        let mut attempt = 1;
        loop {
            cancel.check()?;
            let request = self.submission_request(token, &payload);
            match self.execute(request, cancel).await? {
                Ok(response) => {
                    info!(count, status = response.status_code, "submitted executions to Aqua");
                    return Ok(SubmitResult::posted(count));
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        status = ?e.status_code(),
                        error = %e.summary(),
                        attempt,
                        attempts,
                        "transient failure posting executions"
                    );
                    if attempt >= attempts {
                        return Ok(SubmitResult::failed(count, e.summary()));
                    }
                    let delay = e.retry_after().unwrap_or_else(|| backoff(attempt));
                    debug!(delay_ms = delay.as_millis() as u64, "waiting before retry");
                    cancel.sleep(delay).await?;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        status = ?e.status_code(),
                        body = %loggable_body(&e.get_message()),
                        "failed to post executions"
                    );
                    return Ok(SubmitResult::failed(count, e.summary()));
                }
            }
        }
    }
}

/// `min(30s, 2^(attempt-1) s)`
fn backoff(attempt: u32) -> Duration {
    let seconds = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECONDS);
    Duration::from_secs(seconds)
}

/// `access_token` wins when present, otherwise `token`.
fn extract_token(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let token = match value.get("access_token") {
        Some(access_token) => access_token.as_str(),
        None => value.get("token").and_then(Value::as_str),
    };
    non_blank(token).map(str::to_string)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize_base_url(raw: &str) -> ImportResult<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ImportError::config(format!("invalid Aqua base URL {raw}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
