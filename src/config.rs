use candle_core::Device;
use std::time::Duration;
use tracing::{info, warn};

pub const APP_TITLE: &str = "Stock Market Analysis and Prediction App";
pub const MAIN_WINDOW_SIZE: [f32; 2] = [380.0, 300.0];
pub const CHART_WINDOW_SIZE: [f32; 2] = [1200.0, 600.0];
pub const NOTICE_WINDOW_SIZE: [f32; 2] = [320.0, 160.0];

pub const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
/// `{symbol}` is replaced with the upper-cased ticker.
pub const DEFAULT_LIVE_FEED_URL: &str = "wss://realtime-stock-api.com/ws/stocks/{symbol}";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Date range pre-filled in the form: this many days back from today.
pub const DEFAULT_LOOKBACK_DAYS: u64 = 365;

// ── Forecast Model ──────────────────────────────────────────────────────────
/// Days forecast past the last historical date (five years).
pub const FORECAST_HORIZON_DAYS: u32 = 1825;
pub const YEARLY_PERIOD_DAYS: f64 = 365.25;
pub const YEARLY_ORDER: usize = 10;
pub const WEEKLY_PERIOD_DAYS: f64 = 7.0;
pub const WEEKLY_ORDER: usize = 3;
pub const DAILY_PERIOD_DAYS: f64 = 1.0;
pub const DAILY_ORDER: usize = 4;
pub const MAX_CHANGEPOINTS: usize = 25;
/// Changepoints are placed within this leading fraction of the history.
pub const CHANGEPOINT_RANGE: f64 = 0.8;
/// L2 weight on each trend changepoint coefficient.
pub const CHANGEPOINT_PENALTY: f64 = 1e-3;
/// L2 weight on each Fourier coefficient.
pub const SEASONALITY_PENALTY: f64 = 1e-4;
pub const FIT_STEPS: usize = 1500;
pub const FIT_LEARNING_RATE: f64 = 0.02;
/// Log the fit loss every N optimizer steps.
pub const FIT_LOG_INTERVAL: usize = 250;

// ── Offline data ────────────────────────────────────────────────────────────
pub const MOCK_DAILY_DRIFT: f64 = 0.0005;
pub const MOCK_DAILY_VOL: f64 = 0.02;

/// Runtime settings resolved from the command line, the environment and defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub live_feed_url: String,
    pub http_timeout: Duration,
    pub offline: bool,
    pub use_cuda: bool,
}

impl AppConfig {
    /// Command-line values win over environment values, which win over defaults.
    pub fn resolve(
        cli_live_feed_url: Option<String>,
        cli_http_timeout_secs: Option<u64>,
        offline: bool,
        use_cuda: bool,
    ) -> Self {
        Self::resolve_with(
            cli_live_feed_url,
            cli_http_timeout_secs,
            offline,
            use_cuda,
            |key| std::env::var(key).ok(),
        )
    }

    fn resolve_with(
        cli_live_feed_url: Option<String>,
        cli_http_timeout_secs: Option<u64>,
        offline: bool,
        use_cuda: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let live_feed_url = cli_live_feed_url
            .or_else(|| env("STOCKAPP_LIVE_FEED_URL"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LIVE_FEED_URL.to_string());

        if !live_feed_url.contains("{symbol}") {
            warn!(
                "Live feed URL '{}' has no {{symbol}} placeholder; the symbol will be appended",
                live_feed_url
            );
        }

        let env_timeout = env("STOCKAPP_HTTP_TIMEOUT_SECS").and_then(|v| {
            let parsed = v.trim().parse::<u64>().ok();
            if parsed.is_none() {
                warn!("Ignoring invalid STOCKAPP_HTTP_TIMEOUT_SECS={}", v);
            }
            parsed
        });
        let timeout_secs = cli_http_timeout_secs
            .or(env_timeout)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
            .clamp(1, 300);

        Self {
            live_feed_url,
            http_timeout: Duration::from_secs(timeout_secs),
            offline,
            use_cuda,
        }
    }
}

pub fn get_device(use_cuda: bool) -> Device {
    if use_cuda {
        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA device 0");
                    return device;
                }
                Err(e) => {
                    warn!("Failed to initialize CUDA: {}. Falling back to CPU.", e);
                }
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("--cuda flag set but binary was compiled without the 'cuda' feature. Falling back to CPU.");
        }
    }

    #[cfg(feature = "mkl")]
    info!("Using CPU device with Intel MKL BLAS acceleration");

    #[cfg(not(feature = "mkl"))]
    info!("Using CPU device");

    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_request_falls_back_to_cpu() {
        assert!(get_device(true).is_cpu());
        assert!(get_device(false).is_cpu());
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::resolve_with(None, None, false, false, env_of(&[]));
        assert_eq!(cfg.live_feed_url, DEFAULT_LIVE_FEED_URL);
        assert_eq!(cfg.http_timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_of(&[
            ("STOCKAPP_LIVE_FEED_URL", "ws://env/{symbol}"),
            ("STOCKAPP_HTTP_TIMEOUT_SECS", "12"),
        ]);
        let cfg = AppConfig::resolve_with(Some("ws://cli/{symbol}".into()), None, true, false, env);

        assert_eq!(cfg.live_feed_url, "ws://cli/{symbol}");
        assert_eq!(cfg.http_timeout, Duration::from_secs(12));
        assert!(cfg.offline);
    }

    #[test]
    fn test_timeout_is_clamped_and_garbage_ignored() {
        let cfg = AppConfig::resolve_with(None, Some(10_000), false, false, env_of(&[]));
        assert_eq!(cfg.http_timeout, Duration::from_secs(300));

        let env = env_of(&[("STOCKAPP_HTTP_TIMEOUT_SECS", "soon")]);
        let cfg = AppConfig::resolve_with(None, None, false, false, env);
        assert_eq!(cfg.http_timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
    }

    #[test]
    fn test_blank_url_falls_back_to_default() {
        let env = env_of(&[("STOCKAPP_LIVE_FEED_URL", "   ")]);
        let cfg = AppConfig::resolve_with(None, None, false, false, env);
        assert_eq!(cfg.live_feed_url, DEFAULT_LIVE_FEED_URL);
    }
}
