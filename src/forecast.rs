//! Additive trend + seasonality forecaster.
//!
//! The model is `y(t) = m + k·t + Σ δⱼ·max(0, t − sⱼ) + Σ Fourier terms`, with
//! `y` scaled by its absolute maximum and `t` scaled to `[0, 1]` over the
//! history. Coefficients are fitted by full-batch AdamW on an L2-penalised
//! squared error.

use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use chrono::{Days, NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{
    get_device, CHANGEPOINT_PENALTY, CHANGEPOINT_RANGE, DAILY_ORDER, DAILY_PERIOD_DAYS, FIT_LEARNING_RATE,
    FIT_LOG_INTERVAL, FIT_STEPS, FORECAST_HORIZON_DAYS, MAX_CHANGEPOINTS, SEASONALITY_PENALTY, WEEKLY_ORDER,
    WEEKLY_PERIOD_DAYS, YEARLY_ORDER, YEARLY_PERIOD_DAYS,
};
use crate::data::Dataset;

#[derive(Clone, Debug, PartialEq)]
pub struct ForecastConfig {
    pub daily_seasonality: bool,
    pub horizon_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            daily_seasonality: false,
            horizon_days: FORECAST_HORIZON_DAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub yhat: f64,
}

/// Modelled prices for every historical date followed by each day of the horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct Forecast {
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Need at least {needed} price points to fit a forecast, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Model fit diverged (loss {0})")]
    Diverged(f64),

    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),
}

pub trait Forecaster: Send + Sync {
    fn forecast(&self, data: &Dataset, config: &ForecastConfig) -> Result<Forecast, ForecastError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Seasonality {
    period: f64,
    order: usize,
}

/// Column layout of the regression: `[1, t, changepoints.., fourier..]`.
#[derive(Debug)]
struct Design {
    origin: f64,
    span: f64,
    changepoints: Vec<f64>,
    seasonalities: Vec<Seasonality>,
}

impl Design {
    fn new(days: &[f64], config: &ForecastConfig) -> Self {
        let origin = days.first().copied().unwrap_or(0.0);
        let last = days.last().copied().unwrap_or(origin);
        let span = if last > origin { last - origin } else { 1.0 };

        // Uniformly over the leading CHANGEPOINT_RANGE of the observations,
        // excluding the first one.
        let history_size = (days.len() as f64 * CHANGEPOINT_RANGE).floor() as usize;
        let n_changepoints = MAX_CHANGEPOINTS.min(history_size.saturating_sub(1));
        let changepoints = (1..=n_changepoints)
            .map(|j| {
                let idx = ((history_size - 1) as f64 * j as f64 / n_changepoints as f64).round() as usize;
                (days[idx] - origin) / span
            })
            .collect();

        let mut seasonalities = Vec::new();
        if last - origin >= 2.0 * YEARLY_PERIOD_DAYS {
            seasonalities.push(Seasonality { period: YEARLY_PERIOD_DAYS, order: YEARLY_ORDER });
        }
        if last - origin >= 2.0 * WEEKLY_PERIOD_DAYS {
            seasonalities.push(Seasonality { period: WEEKLY_PERIOD_DAYS, order: WEEKLY_ORDER });
        }
        if config.daily_seasonality {
            seasonalities.push(Seasonality { period: DAILY_PERIOD_DAYS, order: DAILY_ORDER });
        }

        Self {
            origin,
            span,
            changepoints,
            seasonalities,
        }
    }

    fn width(&self) -> usize {
        2 + self.changepoints.len() + self.seasonalities.iter().map(|s| 2 * s.order).sum::<usize>()
    }

    fn features(&self, day: f64) -> Vec<f64> {
        let t = (day - self.origin) / self.span;
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        for season in &self.seasonalities {
            for k in 1..=season.order {
                let angle = 2.0 * std::f64::consts::PI * k as f64 * day / season.period;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        row
    }

    /// Square roots of the per-column L2 weights; intercept and slope are free.
    fn penalty_roots(&self) -> Vec<f32> {
        let mut roots = vec![0.0f32, 0.0];
        roots.extend(std::iter::repeat(CHANGEPOINT_PENALTY.sqrt() as f32).take(self.changepoints.len()));
        roots.extend(std::iter::repeat(SEASONALITY_PENALTY.sqrt() as f32).take(self.width() - roots.len()));
        roots
    }
}

fn day_number(date: NaiveDate) -> f64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64 / 86_400.0
}

pub struct SeasonalTrendModel {
    use_cuda: bool,
    steps: usize,
    learning_rate: f64,
}

impl SeasonalTrendModel {
    pub fn new(use_cuda: bool) -> Self {
        Self {
            use_cuda,
            steps: FIT_STEPS,
            learning_rate: FIT_LEARNING_RATE,
        }
    }

    #[cfg(test)]
    fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    fn fit(&self, design: &Design, days: &[f64], targets: &[f64]) -> Result<Vec<f64>, ForecastError> {
        let device = get_device(self.use_cuda);
        let n = days.len();
        let p = design.width();

        let xs: Vec<f32> = days
            .iter()
            .flat_map(|&day| design.features(day))
            .map(|v| v as f32)
            .collect();
        let ys: Vec<f32> = targets.iter().map(|&v| v as f32).collect();

        let x = Tensor::from_vec(xs, (n, p), &device)?;
        let y = Tensor::from_vec(ys, (n, 1), &device)?;
        let penalty = Tensor::from_vec(design.penalty_roots(), (p, 1), &device)?;

        let weights = Var::zeros((p, 1), DType::F32, &device)?;
        let params = ParamsAdamW {
            lr: self.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut opt = AdamW::new(vec![weights.clone()], params)?;

        let mut last_loss = f64::NAN;
        for step in 0..self.steps {
            let fitted = x.matmul(weights.as_tensor())?;
            let mse = (fitted - &y)?.sqr()?.mean_all()?;
            let reg = weights.as_tensor().mul(&penalty)?.sqr()?.sum_all()?;
            let loss = (mse + reg)?;
            opt.backward_step(&loss)?;

            if step % FIT_LOG_INTERVAL == 0 || step + 1 == self.steps {
                last_loss = loss.to_scalar::<f32>()? as f64;
                debug!("fit step {}/{} loss={:.6}", step + 1, self.steps, last_loss);
            }
        }

        if !last_loss.is_finite() {
            return Err(ForecastError::Diverged(last_loss));
        }

        let coefficients = weights
            .as_tensor()
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        Ok(coefficients)
    }
}

impl Forecaster for SeasonalTrendModel {
    fn forecast(&self, data: &Dataset, config: &ForecastConfig) -> Result<Forecast, ForecastError> {
        if data.len() < 2 {
            return Err(ForecastError::InsufficientData { needed: 2, got: data.len() });
        }

        let days: Vec<f64> = data.points.iter().map(|p| day_number(p.date)).collect();
        let scale = data
            .points
            .iter()
            .map(|p| p.close.abs())
            .fold(0.0, f64::max);
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let targets: Vec<f64> = data.points.iter().map(|p| p.close / scale).collect();

        let design = Design::new(&days, config);
        info!(
            "Fitting forecast for {}: {} points, {} changepoints, {} seasonal terms, horizon {} days",
            data.symbol,
            data.len(),
            design.changepoints.len(),
            design.width() - 2 - design.changepoints.len(),
            config.horizon_days
        );
        let coefficients = self.fit(&design, &days, &targets)?;

        let predict = |date: NaiveDate| -> f64 {
            let row = design.features(day_number(date));
            row.iter().zip(&coefficients).map(|(x, w)| x * w).sum::<f64>() * scale
        };

        let mut points: Vec<ForecastPoint> = data
            .points
            .iter()
            .map(|p| ForecastPoint { date: p.date, yhat: predict(p.date) })
            .collect();

        if let Some(last) = data.last_date() {
            points.extend(
                (1..=config.horizon_days)
                    .filter_map(|d| last.checked_add_days(Days::new(d as u64)))
                    .map(|date| ForecastPoint { date, yhat: predict(date) }),
            );
        }

        Ok(Forecast { points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PricePoint;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn linear_series(days: u64) -> Dataset {
        let start = date(2021, 1, 1);
        let points = (0..days)
            .map(|i| PricePoint {
                date: start.checked_add_days(Days::new(i)).unwrap(),
                close: 100.0 + 0.5 * i as f64,
            })
            .collect();
        Dataset::new("LIN", points)
    }

    #[test]
    fn test_design_layout() {
        let data = Dataset::new_mock("SPY", date(2019, 1, 1), date(2021, 6, 30), 3);
        let days: Vec<f64> = data.points.iter().map(|p| day_number(p.date)).collect();

        let plain = Design::new(&days, &ForecastConfig::default());
        let daily = Design::new(&days, &ForecastConfig { daily_seasonality: true, ..Default::default() });

        assert_eq!(plain.changepoints.len(), MAX_CHANGEPOINTS);
        assert!(plain.changepoints.iter().all(|&s| s > 0.0 && s < CHANGEPOINT_RANGE + 0.05));
        // Yearly and weekly both qualify for a 2.5 year span.
        assert_eq!(plain.seasonalities.len(), 2);
        assert_eq!(daily.width(), plain.width() + 2 * DAILY_ORDER);
        assert_eq!(daily.features(days[10]).len(), daily.width());
        assert_eq!(daily.penalty_roots().len(), daily.width());
    }

    #[test]
    fn test_short_history_has_no_yearly_term() {
        let data = linear_series(60);
        let days: Vec<f64> = data.points.iter().map(|p| day_number(p.date)).collect();
        let design = Design::new(&days, &ForecastConfig::default());

        assert_eq!(
            design.seasonalities,
            vec![Seasonality { period: WEEKLY_PERIOD_DAYS, order: WEEKLY_ORDER }]
        );
    }

    #[test]
    fn test_forecast_covers_history_and_horizon() {
        let data = Dataset::new_mock("MSFT", date(2020, 1, 1), date(2020, 12, 31), 11);
        let config = ForecastConfig { daily_seasonality: true, horizon_days: FORECAST_HORIZON_DAYS };

        let forecast = SeasonalTrendModel::new(false)
            .with_steps(200)
            .forecast(&data, &config)
            .unwrap();

        assert_eq!(forecast.points.len(), data.len() + FORECAST_HORIZON_DAYS as usize);
        assert_eq!(forecast.points.first().map(|p| p.date), data.first_date());
        assert_eq!(
            forecast.points.last().map(|p| p.date),
            data.last_date().and_then(|d| d.checked_add_days(Days::new(1825)))
        );
        assert!(forecast.points.iter().all(|p| p.yhat.is_finite()));
    }

    #[test]
    fn test_forecast_follows_linear_trend() {
        let data = linear_series(300);
        let config = ForecastConfig { daily_seasonality: false, horizon_days: 60 };

        let forecast = SeasonalTrendModel::new(false).forecast(&data, &config).unwrap();

        let n = data.len();
        let mean_abs_err = data
            .points
            .iter()
            .zip(&forecast.points[..n])
            .map(|(actual, fitted)| (actual.close - fitted.yhat).abs())
            .sum::<f64>()
            / n as f64;
        let mean_price = data.points.iter().map(|p| p.close).sum::<f64>() / n as f64;
        assert!(
            mean_abs_err / mean_price < 0.03,
            "in-sample error too large: {mean_abs_err}"
        );

        let last_actual = data.points[n - 1].close;
        let last_forecast = forecast.points.last().unwrap().yhat;
        assert!(
            last_forecast > last_actual,
            "rising series should extrapolate upward ({last_forecast} <= {last_actual})"
        );
    }

    #[test]
    fn test_forecast_needs_two_points() {
        let data = Dataset::new("ONE", vec![PricePoint { date: date(2020, 1, 1), close: 10.0 }]);
        let err = SeasonalTrendModel::new(false)
            .forecast(&data, &ForecastConfig::default())
            .unwrap_err();

        assert!(matches!(err, ForecastError::InsufficientData { needed: 2, got: 1 }));
    }
}
