use crate::cancel::CancelToken;
use crate::config::FetchConfig;
use crate::error::{CheckError, FetchError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

/// Response body plus what the normalizer needs to know about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Retrieves the current payload of a URL. One attempt per call; retries
/// and timeouts are applied by the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError>;
}

/// `reqwest` backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: std::time::Duration,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        Ok(Self {
            client,
            timeout: config.timeout(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn map_error(&self, url: &str, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else if err.is_builder() {
            FetchError::Client(err.to_string())
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| self.map_error(url, &err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = |size: u64| FetchError::TooLarge {
            url: url.to_string(),
            size,
            limit: self.max_body_bytes,
        };
        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(too_large(len));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| self.map_error(url, &err))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > self.max_body_bytes {
                return Err(too_large(bytes.len() as u64));
            }
        }

        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }
}

/// Fetch with a per-attempt timeout and exponential backoff on transient
/// failures. Cancellation aborts immediately and discards partial content.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    config: &FetchConfig,
    cancel: &CancelToken,
) -> Result<FetchedContent, CheckError> {
    let timeout = config.timeout();
    let mut retry = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CheckError::Cancelled),
            res = tokio::time::timeout(timeout, fetcher.fetch(url)) => match res {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                    after: timeout,
                }),
            },
        };

        match attempt {
            Ok(content) => return Ok(content),
            Err(err) if err.is_transient() && retry < config.max_retries => {
                retry += 1;
                let delay = config.backoff(retry);
                log::warn!(
                    "Fetch failed ({err}); retry {retry}/{} in {}ms",
                    config.max_retries,
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(CheckError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
