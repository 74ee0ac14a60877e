use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{MOCK_DAILY_DRIFT, MOCK_DAILY_VOL, YAHOO_CHART_URL};

/// One daily closing price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Historical closing prices for one symbol, oldest first, one point per date.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

/// Failure kinds reported by a [`PriceHistory`] source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("No data found for {symbol}: {reason}")]
    UnknownSymbol { symbol: String, reason: String },

    #[error("No price data for {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Provider error (HTTP {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of daily closing prices over a closed date range.
#[async_trait]
pub trait PriceHistory: Send + Sync {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Dataset, FetchError>;
}

impl Dataset {
    /// Builds a dataset, sorting by date and keeping the last value seen for a repeated date.
    pub fn new(symbol: &str, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);

        let mut history: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match history.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => history.push(point),
            }
        }

        Self {
            symbol: symbol.to_uppercase(),
            points: history,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Synthetic random-walk closes on weekdays in `[start, end]`.
    ///
    /// The same `seed` always yields the same series.
    pub fn new_mock(symbol: &str, start: NaiveDate, end: NaiveDate, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut points = Vec::new();
        let mut price: f64 = 50.0 + rng.gen_range(0.0..150.0);
        let mut day = start;

        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                let z: f64 = rng.sample(StandardNormal);
                let change = MOCK_DAILY_DRIFT + MOCK_DAILY_VOL * z;
                price = (price * (1.0 + change)).max(0.01);
                points.push(PricePoint { date: day, close: price });
            }
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }

        Self::new(symbol, points)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Debug)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    meta: Option<YahooMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooMeta {
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    close: Option<Vec<Option<f64>>>,
}

/// Daily history from the Yahoo Finance chart API.
pub struct YahooHistory {
    client: reqwest::Client,
    base_url: String,
}

impl YahooHistory {
    pub fn new(timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self {
            client,
            base_url: YAHOO_CHART_URL.to_string(),
        })
    }
}

#[async_trait]
impl PriceHistory for YahooHistory {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Dataset, FetchError> {
        let (period1, period2) = range_bounds(start, end);
        let url = format!("{}/{}", self.base_url, symbol);
        debug!("GET {} period1={} period2={}", url, period1, period2);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let data = decode_chart(symbol, status, &body, start, end)?;

        info!(
            "Fetched {} daily closes for {} ({} .. {})",
            data.len(),
            data.symbol,
            start,
            end
        );
        Ok(data)
    }
}

/// Unix-second bounds covering every day of the closed range `[start, end]`.
fn range_bounds(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
    let after_end = end.checked_add_days(Days::new(1)).unwrap_or(end);
    let period2 = after_end.and_time(NaiveTime::MIN).and_utc().timestamp();
    (period1, period2)
}

fn decode_chart(
    symbol: &str,
    status: u16,
    body: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Dataset, FetchError> {
    let success = (200..300).contains(&status);

    let response = match serde_json::from_str::<YahooChartResponse>(body) {
        Ok(parsed) => parsed,
        Err(_) if status == 404 => {
            return Err(FetchError::UnknownSymbol {
                symbol: symbol.to_string(),
                reason: "symbol not found".to_string(),
            });
        }
        Err(_) if !success => {
            return Err(FetchError::Provider {
                status,
                message: body.chars().take(200).collect(),
            });
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(err) = response.chart.error {
        if status == 404 || err.code.eq_ignore_ascii_case("Not Found") {
            return Err(FetchError::UnknownSymbol {
                symbol: symbol.to_string(),
                reason: err.description,
            });
        }
        return Err(FetchError::Provider {
            status,
            message: format!("{}: {}", err.code, err.description),
        });
    }

    if !success {
        return Err(FetchError::Provider {
            status,
            message: "unexpected response status".to_string(),
        });
    }

    let no_data = || FetchError::NoData {
        symbol: symbol.to_uppercase(),
        start,
        end,
    };

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(no_data)?;

    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let timestamps = result.timestamp.unwrap_or_default();
    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .and_then(|q| q.close)
        .unwrap_or_default();

    if timestamps.len() != closes.len() {
        warn!(
            "Yahoo returned {} timestamps but {} closes for {}",
            timestamps.len(),
            closes.len(),
            symbol
        );
    }

    let points: Vec<PricePoint> = timestamps
        .iter()
        .zip(closes.iter())
        .filter_map(|(&ts, close)| {
            let close = (*close)?;
            let date = Utc.timestamp_opt(ts + offset, 0).single()?.date_naive();
            (date >= start && date <= end).then_some(PricePoint { date, close })
        })
        .collect();

    if points.is_empty() {
        return Err(no_data());
    }

    Ok(Dataset::new(symbol, points))
}

// ──────────────────────────────────────────────────────────────────────────────
// Offline source
// ──────────────────────────────────────────────────────────────────────────────

/// Serves deterministic synthetic history; used with `--offline`.
#[derive(Default)]
pub struct MockHistory;

#[async_trait]
impl PriceHistory for MockHistory {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Dataset, FetchError> {
        let mut hasher = DefaultHasher::new();
        symbol.to_uppercase().hash(&mut hasher);
        let data = Dataset::new_mock(symbol, start, end, hasher.finish());

        if data.is_empty() {
            return Err(FetchError::NoData {
                symbol: symbol.to_uppercase(),
                start,
                end,
            });
        }
        Ok(data)
    }
}
