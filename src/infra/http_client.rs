use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::app::ports::HttpClientPort;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::observability::metrics;

/// Single-shot HTTP GET with a hard timeout. Retries belong to the caller.
pub struct ReqwestHttp {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttp {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Unreachable {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            timeout: config.timeout(),
        })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if let Some(status) = e.status() {
            FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    #[instrument(skip(self))]
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let start = Instant::now();
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_error(url, e))?.to_vec();
        metrics::sources::request_duration(start.elapsed().as_secs_f64());
        metrics::sources::payload_bytes(bytes.len());
        debug!("GET {} -> {} bytes", url, bytes.len());
        Ok(bytes)
    }
}
