use chrono::{Days, Local, NaiveDate};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::live::LiveFeedHandle;
use crate::portfolio::normalize_symbol;
use crate::session::{Effect, Notice, Session, EMPTY_SYMBOL_MESSAGE};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A user-triggered request against the session.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    AddSymbol(String),
    ViewPortfolio,
    AnalyzePortfolio { start: NaiveDate, end: NaiveDate },
    Analyze { symbol: String, start: NaiveDate, end: NaiveDate },
    Predict { symbol: String },
}

/// Form state plus the sequencing of actions and their effects.
///
/// One action runs at a time, and its effects are presented one by one; a new
/// action is accepted only once the previous action's effects are dismissed.
pub struct App {
    pub symbol_input: String,
    pub start_input: String,
    pub end_input: String,
    session: Arc<Mutex<Session>>,
    running: Option<mpsc::Receiver<Vec<Effect>>>,
    pending: VecDeque<Effect>,
    live: Option<LiveFeedHandle>,
    live_feed_url: String,
}

impl App {
    pub fn new(session: Session, live_feed_url: &str, lookback_days: u64) -> Self {
        let end = Local::now().date_naive();
        let start = end.checked_sub_days(Days::new(lookback_days)).unwrap_or(end);

        Self {
            symbol_input: String::new(),
            start_input: start.format(DATE_FORMAT).to_string(),
            end_input: end.format(DATE_FORMAT).to_string(),
            session: Arc::new(Mutex::new(session)),
            running: None,
            pending: VecDeque::new(),
            live: None,
            live_feed_url: live_feed_url.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.is_running() || !self.pending.is_empty()
    }

    /// The effect currently on screen, if any.
    pub fn current_effect(&self) -> Option<&Effect> {
        self.pending.front()
    }

    pub fn dismiss_current(&mut self) {
        self.pending.pop_front();
    }

    /// Collects the effects of a finished action. Call once per frame.
    pub fn tick(&mut self) {
        let Some(rx) = &mut self.running else {
            return;
        };

        match rx.try_recv() {
            Ok(effects) => {
                self.pending.extend(effects);
                self.running = None;
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                error!("Action task ended without reporting a result");
                self.pending
                    .push_back(Effect::Notice(Notice::error("The action stopped unexpectedly.")));
                self.running = None;
            }
        }
    }

    /// Starts `action` unless another one is still in progress.
    pub fn dispatch(&mut self, action: Action) -> bool {
        if self.is_busy() {
            return false;
        }

        info!("Dispatching {:?}", action);
        let session = Arc::clone(&self.session);
        let (tx, rx) = mpsc::channel(1);
        self.running = Some(rx);

        tokio::spawn(async move {
            let mut session = session.lock().await;
            let effects = match action {
                Action::AddSymbol(raw) => session.add_symbol(&raw),
                Action::ViewPortfolio => session.view_portfolio(),
                Action::AnalyzePortfolio { start, end } => session.analyze_portfolio(start, end).await,
                Action::Analyze { symbol, start, end } => session.analyze(&symbol, start, end).await,
                Action::Predict { symbol } => session.predict(&symbol).await,
            };
            let _ = tx.send(effects).await;
        });
        true
    }

    fn form_dates(&self) -> Result<(NaiveDate, NaiveDate), Notice> {
        let parse = |label: &str, input: &str| {
            NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| {
                Notice::error(format!("Invalid {label} date '{}'. Use YYYY-MM-DD.", input.trim()))
            })
        };
        Ok((parse("start", &self.start_input)?, parse("end", &self.end_input)?))
    }

    fn dispatch_with_dates(&mut self, build: impl FnOnce(NaiveDate, NaiveDate) -> Action) -> bool {
        if self.is_busy() {
            return false;
        }
        match self.form_dates() {
            Ok((start, end)) => self.dispatch(build(start, end)),
            Err(notice) => {
                self.pending.push_back(Effect::Notice(notice));
                false
            }
        }
    }

    pub fn add_to_portfolio(&mut self) -> bool {
        self.dispatch(Action::AddSymbol(self.symbol_input.clone()))
    }

    pub fn view_portfolio(&mut self) -> bool {
        self.dispatch(Action::ViewPortfolio)
    }

    pub fn analyze_portfolio(&mut self) -> bool {
        self.dispatch_with_dates(|start, end| Action::AnalyzePortfolio { start, end })
    }

    pub fn analyze(&mut self) -> bool {
        let symbol = self.symbol_input.clone();
        self.dispatch_with_dates(move |start, end| Action::Analyze { symbol, start, end })
    }

    pub fn predict(&mut self) -> bool {
        self.dispatch(Action::Predict {
            symbol: self.symbol_input.clone(),
        })
    }

    /// True while a feed is connecting or streaming. A terminated feed keeps
    /// its last label but no longer counts as live.
    pub fn is_live(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|feed| !feed.status().is_terminated())
    }

    pub fn live_symbol(&self) -> Option<&str> {
        self.live.as_ref().map(|feed| feed.symbol())
    }

    /// Starts a feed for `symbol`, replacing any running feed.
    pub fn start_live(&mut self, symbol: &str) {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            self.pending.push_back(Effect::Notice(Notice::error(EMPTY_SYMBOL_MESSAGE)));
            return;
        }
        self.stop_live();
        self.live = Some(LiveFeedHandle::start(&symbol, &self.live_feed_url));
    }

    pub fn stop_live(&mut self) {
        if let Some(feed) = self.live.take() {
            feed.stop();
        }
    }

    pub fn toggle_live(&mut self) {
        if self.is_live() {
            self.stop_live();
        } else {
            let symbol = self.symbol_input.clone();
            self.start_live(&symbol);
        }
    }

    pub fn live_label(&self) -> String {
        match &self.live {
            Some(feed) => feed.status().label(),
            None => "Real-Time Price: N/A".to_string(),
        }
    }
}
