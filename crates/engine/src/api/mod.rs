//! External market data sources

mod binance;
mod rate_limiter;

pub use binance::{BinanceClient, RetryPolicy, DEFAULT_BASE_URL};
pub use rate_limiter::RateLimiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::types::{Candle, DateRange, Timeframe};

/// Candles returned for a requested range, sorted ascending with no duplicate timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedCandles {
    pub candles: Vec<Candle>,
    /// First and last candle timestamps actually delivered
    pub actual_range: Option<DateRange>,
}

impl FetchedCandles {
    /// Sort, drop duplicate timestamps and compute the delivered range
    pub fn from_unordered(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        let actual_range = match (candles.first(), candles.last()) {
            (Some(first), Some(last)) => Some(DateRange {
                start: first.timestamp,
                end: last.timestamp,
            }),
            _ => None,
        };
        Self {
            candles,
            actual_range,
        }
    }
}

/// Source of historical candles
#[async_trait]
pub trait CandleProvider: Send + Sync {
    async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<FetchedCandles, FetchError>;
}
