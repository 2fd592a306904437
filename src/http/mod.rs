//! Blocking `ureq` transport shared by the remote clients
//!
//! Every call runs on the blocking pool so awaiting callers can be cancelled by
//! dropping the future; the abandoned request finishes in the background and its
//! result is discarded.


use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use ureq::Agent;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to encode request body: {0}")]
    Encode(String),
    #[error("Request task failed: {0}")]
    Task(String),
}

impl HttpError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt
    #[inline]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status(status) => *status >= 500 || *status == 429,
            Self::Timeout | Self::Connection(_) => true,
            Self::Transport(_) | Self::Encode(_) | Self::Task(_) => false,
        }
    }
}

impl From<ureq::Error> for HttpError {
    #[inline]
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::StatusCode(status) => Self::Status(status),
            ureq::Error::Timeout(_) => Self::Timeout,
            ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
                Self::Connection(error.to_string())
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

/// HTTP client with a global timeout and a fixed set of extra headers
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: Agent,
    headers: Vec<(String, String)>,
}

impl HttpClient {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: Self::build_agent(timeout),
            headers: Vec::new(),
        }
    }

    fn build_agent(timeout: Duration) -> Agent {
        Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// POST a JSON body and return the response body as text
    #[inline]
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<String, HttpError> {
        let payload = serde_json::to_string(body).map_err(|e| HttpError::Encode(e.to_string()))?;
        let agent = self.agent.clone();
        let headers = self.headers.clone();
        let target = url.to_string();

        debug!("POST {} ({} bytes)", target, payload.len());

        tokio::task::spawn_blocking(move || {
            let mut request = agent
                .post(target.as_str())
                .header("Content-Type", "application/json");
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }
            request
                .send(payload.as_str())
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .await
        .map_err(|e| HttpError::Task(e.to_string()))?
        .map_err(HttpError::from)
    }

    /// GET a resource and return the response body as text
    #[inline]
    pub async fn get(&self, url: &Url) -> Result<String, HttpError> {
        let agent = self.agent.clone();
        let headers = self.headers.clone();
        let target = url.to_string();

        debug!("GET {}", target);

        tokio::task::spawn_blocking(move || {
            let mut request = agent.get(target.as_str());
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }
            request
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .await
        .map_err(|e| HttpError::Task(e.to_string()))?
        .map_err(HttpError::from)
    }
}
