use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::FORECAST_HORIZON_DAYS;
use crate::data::{Dataset, PriceHistory};
use crate::forecast::{ForecastConfig, Forecaster};
use crate::portfolio::{normalize_symbol, AddOutcome, Portfolio};

pub const EMPTY_SYMBOL_MESSAGE: &str = "Please enter a stock symbol.";
pub const EMPTY_PORTFOLIO_MESSAGE: &str = "Portfolio is empty.";
pub const FETCH_FIRST_MESSAGE: &str = "Please fetch data first.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message box shown to the user.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn info(title: &str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    pub style: LineStyle,
    pub points: Vec<(NaiveDate, f64)>,
}

impl Series {
    fn closes(name: &str, style: LineStyle, data: &Dataset) -> Self {
        Self {
            name: name.to_string(),
            style,
            points: data.points.iter().map(|p| (p.date, p.close)).collect(),
        }
    }
}

/// A date/price line chart.
#[derive(Clone, Debug, PartialEq)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
}

impl Chart {
    fn prices(title: String, series: Vec<Series>) -> Self {
        Self {
            title,
            x_label: "Date".to_string(),
            y_label: "Price (USD)".to_string(),
            series,
        }
    }
}

/// Something an action asks the GUI to present, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Notice(Notice),
    Chart(Chart),
}

/// Application state for the lifetime of the process.
pub struct Session {
    portfolio: Portfolio,
    last_fetched: Option<Dataset>,
    history: Arc<dyn PriceHistory>,
    forecaster: Arc<dyn Forecaster>,
}

impl Session {
    pub fn new(history: Arc<dyn PriceHistory>, forecaster: Arc<dyn Forecaster>) -> Self {
        Self {
            portfolio: Portfolio::new(),
            last_fetched: None,
            history,
            forecaster,
        }
    }

    pub fn last_fetched(&self) -> Option<&Dataset> {
        self.last_fetched.as_ref()
    }

    pub fn list_symbols(&self) -> Vec<String> {
        self.portfolio.symbols().to_vec()
    }

    pub fn add_symbol(&mut self, raw: &str) -> Vec<Effect> {
        let notice = match self.portfolio.add(raw) {
            AddOutcome::Added(symbol) => {
                info!("Added {} to portfolio ({} symbols)", symbol, self.portfolio.len());
                Notice::info("Info", format!("{symbol} added to portfolio."))
            }
            AddOutcome::Duplicate(symbol) => Notice::info("Info", format!("{symbol} is already in the portfolio.")),
            AddOutcome::Empty => Notice::error(EMPTY_SYMBOL_MESSAGE),
        };
        vec![Effect::Notice(notice)]
    }

    pub fn view_portfolio(&self) -> Vec<Effect> {
        let notice = if self.portfolio.is_empty() {
            Notice::info("Portfolio", EMPTY_PORTFOLIO_MESSAGE)
        } else {
            Notice::info("Portfolio", self.list_symbols().join("\n"))
        };
        vec![Effect::Notice(notice)]
    }

    /// Fetches one symbol, remembers it for [`Session::predict`] and charts it.
    pub async fn analyze(&mut self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Effect> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return vec![Effect::Notice(Notice::error(EMPTY_SYMBOL_MESSAGE))];
        }

        info!("Analyzing {} from {} to {}", symbol, start, end);
        match self.history.fetch(&symbol, start, end).await {
            Ok(data) => {
                info!(
                    "Fetched {} points for {} ({:?} to {:?})",
                    data.len(),
                    symbol,
                    data.first_date(),
                    data.last_date()
                );
                let chart = Chart::prices(
                    format!("{symbol} Stock Price Analysis"),
                    vec![Series::closes("Historical Prices", LineStyle::Solid, &data)],
                );
                self.last_fetched = Some(data);
                vec![Effect::Chart(chart)]
            }
            Err(e) => {
                warn!("Fetch failed for {}: {}", symbol, e);
                vec![Effect::Notice(Notice::error(format!("Error fetching data: {e}")))]
            }
        }
    }

    /// Charts every portfolio symbol on one figure. A failed symbol is reported
    /// and skipped.
    pub async fn analyze_portfolio(&self, start: NaiveDate, end: NaiveDate) -> Vec<Effect> {
        if self.portfolio.is_empty() {
            return vec![Effect::Notice(Notice::info("Info", EMPTY_PORTFOLIO_MESSAGE))];
        }

        info!(
            "Analyzing portfolio of {} symbols from {} to {}",
            self.portfolio.len(),
            start,
            end
        );

        let mut effects = Vec::new();
        let mut series = Vec::with_capacity(self.portfolio.len());

        for symbol in self.portfolio.symbols() {
            match self.history.fetch(symbol, start, end).await {
                Ok(data) => series.push(Series::closes(symbol, LineStyle::Solid, &data)),
                Err(e) => {
                    warn!("Portfolio fetch failed for {}: {}", symbol, e);
                    effects.push(Effect::Notice(Notice::error(format!(
                        "Error fetching data for {symbol}: {e}"
                    ))));
                }
            }
        }

        effects.push(Effect::Chart(Chart::prices(
            "Portfolio Stock Price Analysis".to_string(),
            series,
        )));
        effects
    }

    /// Forecasts the last fetched dataset. An empty `symbol` means the symbol of
    /// that dataset; any other symbol must match it.
    pub async fn predict(&self, symbol: &str) -> Vec<Effect> {
        let Some(data) = self.last_fetched() else {
            return vec![Effect::Notice(Notice::error(FETCH_FIRST_MESSAGE))];
        };

        let requested = normalize_symbol(symbol);
        let symbol = if requested.is_empty() { data.symbol.clone() } else { requested };
        if symbol != data.symbol {
            warn!(
                "Refusing to predict {} from data fetched for {}",
                symbol, data.symbol
            );
            return vec![Effect::Notice(Notice::error(format!(
                "The last fetched data is for {}. Analyze {} before predicting it.",
                data.symbol, symbol
            )))];
        }

        let config = ForecastConfig {
            daily_seasonality: true,
            horizon_days: FORECAST_HORIZON_DAYS,
        };
        let forecaster = Arc::clone(&self.forecaster);
        let dataset = data.clone();

        info!("Predicting {} over {} days", symbol, config.horizon_days);
        let result = tokio::task::spawn_blocking(move || forecaster.forecast(&dataset, &config)).await;

        let forecast = match result {
            Ok(Ok(forecast)) => forecast,
            Ok(Err(e)) => {
                error!("Forecast failed for {}: {}", symbol, e);
                return vec![Effect::Notice(Notice::error(format!("Prediction failed: {e}")))];
            }
            Err(e) => {
                error!("Forecast task for {} did not complete: {}", symbol, e);
                return vec![Effect::Notice(Notice::error(format!("Prediction failed: {e}")))];
            }
        };

        let predicted = Series {
            name: "Predicted Prices".to_string(),
            style: LineStyle::Dashed,
            points: forecast.points.iter().map(|p| (p.date, p.yhat)).collect(),
        };
        let chart = Chart::prices(
            format!("{symbol} Stock Price Prediction"),
            vec![Series::closes("Actual Prices", LineStyle::Solid, data), predicted],
        );
        vec![Effect::Chart(chart)]
    }
}
