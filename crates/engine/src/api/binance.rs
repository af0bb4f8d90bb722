//! Binance public API client for historical klines (no authentication required)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CandleProvider, FetchedCandles, RateLimiter};
use crate::error::FetchError;
use crate::types::{Candle, Timeframe};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;
const INVALID_SYMBOL_CODE: i64 = -1121;

/// Exponential backoff with +/-25% jitter for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    /// Candle plus the kline close time used to advance pagination
    fn into_candle(self) -> Option<(Candle, i64)> {
        let candle = Candle {
            timestamp: self.0,
            open: self.1.parse().ok()?,
            high: self.2.parse().ok()?,
            low: self.3.parse().ok()?,
            close: self.4.parse().ok()?,
            volume: self.5.parse().ok()?,
        };
        Some((candle, self.6))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
}

fn classify_error(status: u16, body: String, symbol: &str) -> FetchError {
    match status {
        429 | 418 => FetchError::RateLimited { status },
        400 => match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) if err.code == INVALID_SYMBOL_CODE => {
                FetchError::InvalidSymbol(symbol.to_string())
            }
            _ => FetchError::Api { status, body },
        },
        _ => FetchError::Api { status, body },
    }
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One request for at most `limit` klines starting at `start_time`
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
        limit: u32,
    ) -> Result<Vec<(Candle, i64)>, FetchError> {
        self.limiter.acquire().await;

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            symbol,
            interval,
            start_time,
            end_time,
            limit.min(MAX_KLINES_PER_REQUEST)
        );

        debug!(symbol, interval, start_time, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, body, symbol));
        }

        let raw_klines: Vec<RawKline> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        let received = raw_klines.len();

        let klines: Vec<(Candle, i64)> = raw_klines
            .into_iter()
            .filter_map(RawKline::into_candle)
            .collect();

        if klines.len() < received {
            warn!(
                symbol,
                dropped = received - klines.len(),
                "Dropped klines with unparseable numbers"
            );
        }

        debug!(count = klines.len(), "Fetched klines");
        Ok(klines)
    }

    async fn get_klines_with_retry(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<(Candle, i64)>, FetchError> {
        let mut attempt = 0;
        loop {
            match self
                .get_klines(symbol, interval, start_time, end_time, MAX_KLINES_PER_REQUEST)
                .await
            {
                Ok(klines) => return Ok(klines),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        symbol,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Kline request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch klines with automatic pagination for ranges > 1000 bars
    pub async fn get_klines_paginated(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, FetchError> {
        let interval = timeframe.as_str();
        let mut all_klines = Vec::new();
        let mut current_start = start_time;

        info!(symbol, interval, "Fetching paginated klines from Binance");

        while current_start < end_time {
            let klines = self
                .get_klines_with_retry(symbol, interval, current_start, end_time)
                .await?;

            let Some(last_close_time) = klines.last().map(|(_, close_time)| *close_time) else {
                break;
            };
            let batch_len = klines.len();
            all_klines.extend(klines.into_iter().map(|(candle, _)| candle));

            // Move start to after the last candle
            let next_start = last_close_time + 1;
            if next_start <= current_start || batch_len < MAX_KLINES_PER_REQUEST as usize {
                break;
            }
            current_start = next_start;
        }

        info!(symbol, interval, total = all_klines.len(), "Paginated kline fetch complete");
        Ok(all_klines)
    }
}

#[async_trait]
impl CandleProvider for BinanceClient {
    async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<FetchedCandles, FetchError> {
        let candles = self
            .get_klines_paginated(symbol, timeframe, start, end)
            .await?;
        Ok(FetchedCandles::from_unordered(candles))
    }
}
