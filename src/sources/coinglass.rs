use crate::aggregators::aggregate_indicators;
use crate::types::*;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// CoinGlass bull market peak indicator endpoint
pub const DEFAULT_API_URL: &str = "https://open-api-v4.coinglass.com/api/bull-market-peak-indicator";

/// Header carrying the CoinGlass API key
pub const API_KEY_HEADER: &str = "cg-api-key";

/// Statuses worth another attempt
pub const RETRIABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Exponential backoff schedule between attempts.
///
/// Attempt `r > 0` waits `base_delay * 2^(r-1)`; there is no jitter and no cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (0-based); the first attempt never waits
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        Some(self.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1)))
    }

    /// Every delay a fully exhausted cycle sleeps through, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..=self.max_retries)
            .filter_map(|attempt| self.delay_before(attempt))
            .collect()
    }

    /// Drive `attempt` until it yields a success envelope, a fatal failure,
    /// or the retry budget runs out, sleeping between attempts.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> AggregateResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        for r in 0..=self.max_retries {
            match self.delay_before(r) {
                Some(delay) => {
                    info!(
                        "Retrying API call (attempt {}/{}). Waiting {:.1}s...",
                        r,
                        self.max_retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => info!("Fetching data from CoinGlass API..."),
            }

            let failure = match attempt().await {
                FetchOutcome::Success(envelope) => match envelope.code_str().as_str() {
                    "200" => {
                        let agg = aggregate_indicators(envelope.records());
                        info!(
                            "Hold: {:.2}% | Sell: {:.2}% | Signal: {}",
                            agg.hold_pct, agg.sell_pct, agg.label
                        );
                        return Ok(agg);
                    }
                    code => {
                        let message = envelope
                            .msg
                            .unwrap_or_else(|| format!("Upstream returned code {}", code));
                        FetchError::Upstream {
                            code: code.to_string(),
                            message,
                        }
                    }
                },
                FetchOutcome::RetriableFailure { status, .. } => {
                    FetchError::RetriableServer { status }
                }
                FetchOutcome::NetworkFailure { message } => FetchError::Network(message),
                FetchOutcome::FatalFailure { status: Some(status), message }
                    if !status_is_success(status) =>
                {
                    FetchError::FatalClient { status, message }
                }
                FetchOutcome::FatalFailure { message, .. } => FetchError::Decode(message),
            };

            if !failure.is_retriable() {
                error!("Non-retriable error. Reason: {}", failure);
                return Err(failure);
            }

            if r == self.max_retries {
                error!("Failed after {} retries. Reason: {}", self.max_retries, failure);
                return Err(FetchError::RetriesExhausted {
                    retries: self.max_retries,
                    last: Box::new(failure),
                });
            }
        }

        // Should not reach here, but fallback error
        error!("Unexpected exit from fetch retry loop");
        Err(FetchError::Unknown)
    }
}

/// CoinGlass peak indicator client
pub struct CoinGlassClient {
    client: Client,
    api_url: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl CoinGlassClient {
    /// Per-request timeout (10 seconds for individual API calls)
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Time limit for one attempt, covering the response body as well as the headers
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Request headers: always JSON, API key only when non-empty.
    ///
    /// A key that cannot be sent as a header value is an error rather than
    /// silently dropped.
    pub fn build_headers(api_key: Option<&str>) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| FetchError::InvalidApiKey(e.to_string()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(headers)
    }

    /// Issue one GET and classify what came back, all within the request timeout
    pub async fn attempt_fetch(&self, headers: &HeaderMap) -> FetchOutcome {
        match tokio::time::timeout(self.request_timeout, self.send_and_classify(headers)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Request to {} timed out after {:?}",
                    self.api_url, self.request_timeout
                );
                FetchOutcome::NetworkFailure {
                    message: format!("request timed out after {:?}", self.request_timeout),
                }
            }
        }
    }

    async fn send_and_classify(&self, headers: &HeaderMap) -> FetchOutcome {
        let response = match self.client.get(&self.api_url).headers(headers.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Network error during single fetch attempt: {}", e);
                return FetchOutcome::NetworkFailure { message: e.to_string() };
            }
        };

        let status = response.status();

        if RETRIABLE_STATUSES.contains(&status.as_u16()) {
            warn!("API returned retriable status {}", status.as_u16());
            return FetchOutcome::RetriableFailure {
                status: status.as_u16(),
                message: format!("API Error: Retriable status {}", status.as_u16()),
            };
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = upstream_message(status, &text);
            error!("HTTP error during single fetch attempt: {} - {}", status.as_u16(), message);
            return FetchOutcome::FatalFailure {
                status: Some(status.as_u16()),
                message,
            };
        }

        // Body transport errors are network failures; only a complete body can fail to decode
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Network error while reading response body: {}", e);
                return FetchOutcome::NetworkFailure { message: e.to_string() };
            }
        };

        match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => FetchOutcome::Success(envelope),
            Err(e) => {
                error!("Failed to decode response body: {}", e);
                FetchOutcome::FatalFailure {
                    status: Some(status.as_u16()),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Fetch the indicator set with exponential backoff and aggregate it.
    ///
    /// Retriable statuses and transport failures are retried up to
    /// `max_retries` times; everything else ends the cycle immediately.
    pub async fn fetch_aggregate(&self, api_key: Option<&str>) -> AggregateResult {
        let headers = match Self::build_headers(api_key) {
            Ok(headers) => headers,
            Err(e) => {
                error!("Non-retriable error. Reason: {}", e);
                return Err(e);
            }
        };

        self.retry.run(|| self.attempt_fetch(&headers)).await
    }

    /// Source name
    pub fn name(&self) -> &str {
        "coinglass"
    }
}

fn status_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Prefer the envelope `msg` of an error body, else the reason phrase
fn upstream_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Envelope>(body)
        .ok()
        .and_then(|envelope| envelope.msg)
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string()
        })
}

#[async_trait::async_trait]
impl SentimentSource for CoinGlassClient {
    async fn fetch_aggregate(&self, api_key: Option<&str>) -> AggregateResult {
        CoinGlassClient::fetch_aggregate(self, api_key).await
    }

    fn name(&self) -> &str {
        "coinglass"
    }
}
