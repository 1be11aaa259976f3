//! HTTP fetch layer shared by every checker

use std::time::Duration;

use serde_json::Value;

/// Fetch tuning
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts for a transient failure, including the first
    pub attempts: u32,
    /// Sleep before retry N is `backoff_base * 2^(N-1)`, capped at `max_backoff`
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            attempts: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    /// Sleep before the retry that follows failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// GET requests with timeout and bounded retry
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("watchpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub async fn get_text(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        let response = self.get(url, headers, query).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::Decode(format!("{}: {}", url, e)))
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<Value, FetchError> {
        let response = self.get(url, headers, query).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("{}: {}", url, e)))
    }

    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, FetchError> {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.send_once(url, headers, query).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= attempts {
                return Err(err);
            }

            let delay = self.config.backoff(attempt);
            tracing::debug!(url, attempt, error = %err, ?delay, "Retrying fetch");
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Decode(_) | FetchError::Client(_) => false,
        }
    }
}
