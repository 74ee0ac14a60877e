mod app;
mod config;
mod data;
mod forecast;
mod gui;
mod live;
mod portfolio;
mod session;

use app::App;
use clap::{Parser, ValueEnum};
use config::AppConfig;
use data::{MockHistory, PriceHistory, YahooHistory};
use forecast::SeasonalTrendModel;
use session::Session;
use std::io;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum GuiRendererChoice {
    Auto,
    Wgpu,
    Glow,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stockdesk: stock price analysis, portfolio charts and long-range forecasts",
    after_help = "EXAMPLES:
    # Launch the app
    cargo run --release

    # Start with a live price feed for AAPL
    cargo run --release -- --live AAPL

    # Work without network access using generated prices
    cargo run --release -- --offline

    # Remote desktop friendly rendering
    cargo run --release -- --gui-renderer glow --gui-safe-mode"
)]
struct Args {
    /// GUI renderer backend (auto|wgpu|glow). Useful for RDP compatibility.
    #[arg(long, value_enum, default_value_t = GuiRendererChoice::Wgpu)]
    gui_renderer: GuiRendererChoice,

    /// Enable GUI safe mode for remote desktop (disables vsync/MSAA and hardware acceleration).
    #[arg(long)]
    gui_safe_mode: bool,

    /// Start streaming real-time prices for this symbol
    #[arg(long, value_name = "SYMBOL")]
    live: Option<String>,

    /// WebSocket URL template for real-time prices; `{symbol}` is replaced (env: STOCKAPP_LIVE_FEED_URL)
    #[arg(long)]
    live_feed_url: Option<String>,

    /// Timeout in seconds for history requests (env: STOCKAPP_HTTP_TIMEOUT_SECS)
    #[arg(long)]
    http_timeout_secs: Option<u64>,

    /// Use generated prices instead of the Yahoo Finance history service
    #[arg(long)]
    offline: bool,

    /// Use CUDA GPU acceleration for forecasting (requires --features cuda at compile time)
    #[arg(long)]
    cuda: bool,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("stockdesk=info,wgpu_core=error,wgpu_hal=error")
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
    let args = Args::parse();

    let config = AppConfig::resolve(
        args.live_feed_url.clone(),
        args.http_timeout_secs,
        args.offline,
        args.cuda,
    );
    info!("Resolved configuration: {:?}", config);

    let history: Arc<dyn PriceHistory> = if config.offline {
        info!("Offline mode: serving generated price history");
        Arc::new(MockHistory)
    } else {
        let yahoo = YahooHistory::new(config.http_timeout).map_err(|e| io::Error::other(e.to_string()))?;
        Arc::new(yahoo)
    };
    let forecaster = Arc::new(SeasonalTrendModel::new(config.use_cuda));
    let session = Session::new(history, forecaster);

    let mut app = App::new(session, &config.live_feed_url, config::DEFAULT_LOOKBACK_DAYS);
    if let Some(symbol) = &args.live {
        app.symbol_input = symbol.clone();
        app.start_live(symbol);
    }

    let mut options = eframe::NativeOptions::default();
    options.viewport = egui::ViewportBuilder::default()
        .with_title(config::APP_TITLE)
        .with_inner_size(config::MAIN_WINDOW_SIZE)
        .with_resizable(false);
    options.renderer = match args.gui_renderer {
        GuiRendererChoice::Auto => eframe::Renderer::Wgpu,
        GuiRendererChoice::Wgpu => eframe::Renderer::Wgpu,
        GuiRendererChoice::Glow => eframe::Renderer::Glow,
    };

    if args.gui_safe_mode {
        options.vsync = false;
        options.multisampling = 0;
        options.depth_buffer = 0;
        options.stencil_buffer = 0;
        options.hardware_acceleration = eframe::HardwareAcceleration::Off;
    }

    info!(
        "Launching GUI with renderer: {:?}, safe_mode={}",
        args.gui_renderer,
        args.gui_safe_mode
    );
    eframe::run_native(
        config::APP_TITLE,
        options,
        Box::new(|cc| {
            gui::GuiApp::install_theme(&cc.egui_ctx);
            Ok(Box::new(gui::GuiApp::new(app)))
        }),
    ).map_err(|e| io::Error::other(e.to_string()))?;

    Ok(())
}
