use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::portfolio::normalize_symbol;

#[derive(Clone, Debug, PartialEq)]
pub enum LiveStatus {
    Connecting {
        symbol: String,
    },
    Streaming {
        symbol: String,
        price: String,
    },
    Terminated {
        symbol: String,
        reason: String,
        last_price: Option<String>,
    },
}

impl LiveStatus {
    /// Text for the real-time price label.
    pub fn label(&self) -> String {
        match self {
            Self::Streaming { price, .. } => format!("Real-Time Price: {price} USD"),
            Self::Terminated {
                last_price: Some(price),
                ..
            } => format!("Real-Time Price: {price} USD (feed closed)"),
            _ => "Real-Time Price: N/A".to_string(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

#[derive(Debug, Error)]
pub enum LiveFeedError {
    #[error("connect failed: {0}")]
    Connect(tokio_tungstenite::tungstenite::Error),

    #[error("transport error: {0}")]
    Transport(tokio_tungstenite::tungstenite::Error),

    #[error("bad payload: {0}")]
    Payload(String),
}

#[derive(Deserialize)]
struct PricePayload {
    price: Value,
}

/// Fills the `{symbol}` placeholder, or appends the symbol as a path segment.
pub fn feed_url(template: &str, symbol: &str) -> String {
    if template.contains("{symbol}") {
        template.replace("{symbol}", symbol)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), symbol)
    }
}

/// Extracts `price` from a feed message. Numbers and strings are accepted.
pub fn parse_price(text: &str) -> Result<String, LiveFeedError> {
    let payload: PricePayload =
        serde_json::from_str(text).map_err(|e| LiveFeedError::Payload(e.to_string()))?;

    match payload.price {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(LiveFeedError::Payload(format!("unexpected price value {other}"))),
    }
}

/// A running live feed. Dropping the handle stops the feed.
pub struct LiveFeedHandle {
    symbol: String,
    status: watch::Receiver<LiveStatus>,
    task: JoinHandle<()>,
}

impl LiveFeedHandle {
    /// Spawns the receive loop on the current tokio runtime.
    pub fn start(symbol: &str, url_template: &str) -> Self {
        let symbol = normalize_symbol(symbol);
        let url = feed_url(url_template, &symbol);
        let (tx, rx) = watch::channel(LiveStatus::Connecting { symbol: symbol.clone() });

        let task_symbol = symbol.clone();
        let task = tokio::spawn(async move {
            let mut last_price = None;
            let reason = match run_feed(&url, &task_symbol, &tx, &mut last_price).await {
                Ok(()) => "connection closed by server".to_string(),
                Err(e) => e.to_string(),
            };
            warn!("Live feed for {} terminated: {}", task_symbol, reason);
            tx.send_replace(LiveStatus::Terminated {
                symbol: task_symbol,
                reason,
                last_price,
            });
        });

        Self {
            symbol,
            status: rx,
            task,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn status(&self) -> LiveStatus {
        self.status.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.status.clone()
    }

    pub fn stop(self) {
        info!("Stopping live feed for {}", self.symbol);
        self.task.abort();
    }
}

impl Drop for LiveFeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_feed(
    url: &str,
    symbol: &str,
    tx: &watch::Sender<LiveStatus>,
    last_price: &mut Option<String>,
) -> Result<(), LiveFeedError> {
    info!("Connecting live feed for {} at {}", symbol, url);
    let (ws_stream, _) = connect_async(url).await.map_err(LiveFeedError::Connect)?;
    info!("Live feed connected for {}", symbol);

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg.map_err(LiveFeedError::Transport)? {
            Message::Text(text) => {
                let price = parse_price(&text)?;
                debug!("{} live price {}", symbol, price);
                *last_price = Some(price.clone());
                tx.send_replace(LiveStatus::Streaming {
                    symbol: symbol.to_string(),
                    price,
                });
            }
            Message::Ping(payload) => {
                write
                    .send(Message::Pong(payload))
                    .await
                    .map_err(LiveFeedError::Transport)?;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    /// Serves one client: sends `messages`, optionally closes, then waits for the
    /// client to go away.
    async fn serve(messages: Vec<&'static str>, close: bool) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for text in messages {
                ws.send(Message::Text(text.to_string())).await.unwrap();
            }
            if close {
                let _ = ws.close(None).await;
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        (format!("ws://{addr}/ws/stocks/{{symbol}}"), server)
    }

    #[test]
    fn test_feed_url() {
        assert_eq!(
            feed_url("wss://host/ws/stocks/{symbol}", "AAPL"),
            "wss://host/ws/stocks/AAPL"
        );
        assert_eq!(feed_url("wss://host/stream/", "AAPL"), "wss://host/stream/AAPL");
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price(r#"{"price": 101.5}"#).unwrap(), "101.5");
        assert_eq!(parse_price(r#"{"price": "99.10", "symbol": "X"}"#).unwrap(), "99.10");
        assert!(matches!(parse_price(r#"{"bid": 1}"#), Err(LiveFeedError::Payload(_))));
        assert!(matches!(parse_price(r#"{"price": null}"#), Err(LiveFeedError::Payload(_))));
        assert!(matches!(parse_price("not json"), Err(LiveFeedError::Payload(_))));
    }

    #[test]
    fn test_label() {
        let idle = LiveStatus::Connecting { symbol: "X".into() };
        assert_eq!(idle.label(), "Real-Time Price: N/A");

        let streaming = LiveStatus::Streaming { symbol: "X".into(), price: "12.5".into() };
        assert_eq!(streaming.label(), "Real-Time Price: 12.5 USD");

        let dead = LiveStatus::Terminated { symbol: "X".into(), reason: "gone".into(), last_price: None };
        assert_eq!(dead.label(), "Real-Time Price: N/A");
        assert!(dead.is_terminated());

        let closed = LiveStatus::Terminated { symbol: "X".into(), reason: "gone".into(), last_price: Some("12.5".into()) };
        assert_eq!(closed.label(), "Real-Time Price: 12.5 USD (feed closed)");
        assert!(!streaming.is_terminated());
    }

    #[tokio::test]
    async fn test_streams_latest_price() {
        let (url, _server) = serve(vec![r#"{"price": 100}"#, r#"{"price": 101.5}"#], false).await;
        let feed = LiveFeedHandle::start("msft", &url);
        assert_eq!(feed.symbol(), "MSFT");

        let mut rx = feed.subscribe();
        let status = tokio::time::timeout(
            WAIT,
            rx.wait_for(|s| matches!(s, LiveStatus::Streaming { price, .. } if price == "101.5")),
        )
        .await
        .expect("timed out waiting for price")
        .expect("feed task dropped its sender")
        .clone();

        assert_eq!(status.label(), "Real-Time Price: 101.5 USD");
        feed.stop();
    }

    #[tokio::test]
    async fn test_server_close_terminates_feed() {
        let (url, _server) = serve(vec![r#"{"price": 100}"#], true).await;
        let feed = LiveFeedHandle::start("SPY", &url);

        let mut rx = feed.subscribe();
        let status = tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, LiveStatus::Terminated { .. })))
            .await
            .expect("timed out waiting for termination")
            .expect("feed task dropped its sender")
            .clone();

        match status {
            LiveStatus::Terminated { symbol, last_price, .. } => {
                assert_eq!(symbol, "SPY");
                assert_eq!(last_price.as_deref(), Some("100"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_payload_terminates_feed() {
        let (url, _server) = serve(vec![r#"{"bid": 1}"#], false).await;
        let feed = LiveFeedHandle::start("SPY", &url);

        let mut rx = feed.subscribe();
        let status = tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, LiveStatus::Terminated { .. })))
            .await
            .expect("timed out waiting for termination")
            .expect("feed task dropped its sender")
            .clone();

        match status {
            LiveStatus::Terminated { reason, .. } => assert!(reason.contains("bad payload"), "{reason}"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_terminates_feed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let feed = LiveFeedHandle::start("SPY", &format!("ws://{addr}/{{symbol}}"));
        let mut rx = feed.subscribe();
        let status = tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, LiveStatus::Terminated { .. })))
            .await
            .expect("timed out waiting for termination")
            .expect("feed task dropped its sender")
            .clone();

        match status {
            LiveStatus::Terminated { reason, .. } => assert!(reason.starts_with("connect failed"), "{reason}"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_disconnects() {
        let (url, server) = serve(vec![r#"{"price": 7}"#], false).await;
        let feed = LiveFeedHandle::start("SPY", &url);

        let mut rx = feed.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, LiveStatus::Streaming { .. })))
            .await
            .expect("timed out waiting for price")
            .expect("feed task dropped its sender");

        feed.stop();
        tokio::time::timeout(WAIT, server)
            .await
            .expect("server still connected after stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Only publishes a price once the client has ponged.
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Pong(payload) = msg {
                    assert_eq!(payload, b"hb");
                    break;
                }
            }
            ws.send(Message::Text(r#"{"price": 5}"#.to_string())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let feed = LiveFeedHandle::start("SPY", &format!("ws://{addr}/{{symbol}}"));
        let mut rx = feed.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, LiveStatus::Streaming { price, .. } if price == "5")))
            .await
            .expect("timed out waiting for price after pong")
            .expect("feed task dropped its sender");
        feed.stop();
    }
}
