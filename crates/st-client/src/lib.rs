//! Client for the local activity monitor server.
//!
//! Provides:
//! - The HTTP client for the server's liveness, identity and logging endpoints
//! - The [`MonitorApi`] seam the submission gates are written against
//! - Submission cycles and probes (see [`submission`])

use std::fmt;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use st_core::SiteTimes;

pub mod submission;

pub use submission::{
    CycleReport, Disposition, LinkState, LinkUpdate, check_server, check_user, submit_cycle,
};

/// Default base address of the monitor server.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured server URL cannot be used as a base address.
    #[error("invalid server URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Server answered with a status the caller does not handle.
    #[error("server returned status {status}")]
    Status { status: u16 },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Opaque user identifier issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for an empty identifier.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() { None } else { Some(Self(id)) }
    }

    /// Reads an identity from a JSON value.
    ///
    /// The server sends either a string or a number; `null`, empty strings
    /// and zero all mean "nobody is logged in".
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(id) => Self::new(id.as_str()),
            serde_json::Value::Number(id) if id.as_f64() != Some(0.0) => {
                Some(Self(id.to_string()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of `POST /log_activity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityReport {
    pub site_times: SiteTimes,
    /// Client time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// How the server answered a log submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// 2xx; the confirmation payload if it was JSON.
    Accepted { receipt: Option<serde_json::Value> },
    /// 403; nobody is logged in on the server side.
    Forbidden { message: String },
}

/// The monitor server endpoints.
///
/// Probes return `Err(ClientError::Status { .. })` for non-2xx answers so
/// callers can tell them apart from transport failures.
pub trait MonitorApi {
    /// `GET /ping`. Returns the identity the server included, if any.
    fn ping(&self) -> impl Future<Output = Result<Option<UserId>, ClientError>> + Send;

    /// `GET /current_user`.
    fn current_user(&self) -> impl Future<Output = Result<Option<UserId>, ClientError>> + Send;

    /// `POST /log_activity`. Statuses other than 2xx and 403 are errors.
    fn log_activity(
        &self,
        report: &ActivityReport,
    ) -> impl Future<Output = Result<LogOutcome, ClientError>> + Send;
}

/// HTTP client for the monitor server.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpMonitor {
    http: reqwest::Client,
    base: Url,
    ping_url: Url,
    current_user_url: Url,
    log_activity_url: Url,
}

impl HttpMonitor {
    /// Creates a client for the server at `base_url`.
    ///
    /// Without `timeout` requests rely on the transport defaults.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let base = parse_base_url(base_url)?;
        let join = |path: &str| {
            base.join(path).map_err(|err| ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: err.to_string(),
            })
        };
        let ping_url = join("ping")?;
        let current_user_url = join("current_user")?;
        let log_activity_url = join("log_activity")?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ClientError::ClientBuild)?;

        Ok(Self {
            http,
            base,
            ping_url,
            current_user_url,
            log_activity_url,
        })
    }

    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    async fn fetch_identity(&self, url: &Url) -> Result<Option<UserId>, ClientError> {
        let response = self
            .http
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        parse_identity(&body)
    }
}

impl MonitorApi for HttpMonitor {
    async fn ping(&self) -> Result<Option<UserId>, ClientError> {
        self.fetch_identity(&self.ping_url).await
    }

    async fn current_user(&self) -> Result<Option<UserId>, ClientError> {
        self.fetch_identity(&self.current_user_url).await
    }

    async fn log_activity(&self, report: &ActivityReport) -> Result<LogOutcome, ClientError> {
        let response = self
            .http
            .post(self.log_activity_url.clone())
            .header(ACCEPT, "application/json")
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            // The server has accepted the data; an unreadable receipt does not change that.
            let receipt = response
                .text()
                .await
                .ok()
                .and_then(|body| serde_json::from_str(&body).ok());
            return Ok(LogOutcome::Accepted { receipt });
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Ok(LogOutcome::Forbidden {
                message: parse_error_message(&body),
            });
        }
        Err(ClientError::Status {
            status: status.as_u16(),
        })
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason,
    };

    let mut base = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
    if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
        return Err(invalid("expected an http(s) base address".to_string()));
    }
    // Endpoints are joined relative to the base, which needs a trailing slash.
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn parse_identity(body: &str) -> Result<Option<UserId>, ClientError> {
    #[derive(Deserialize)]
    struct IdentityReply {
        #[serde(default)]
        user_id: serde_json::Value,
    }

    let reply: IdentityReply =
        serde_json::from_str(body).map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
    Ok(UserId::from_json(&reply.user_id))
}

fn parse_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorReply {
        message: String,
    }

    serde_json::from_str::<ErrorReply>(body)
        .map(|reply| reply.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
