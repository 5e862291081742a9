use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Error, MarketTick, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Binance kline/candlestick WebSocket stream for a single symbol.
///
/// Connects to the 1-minute kline stream and forwards every update as a
/// `MarketTick`. Reconnects with exponential backoff until the receiving side
/// is dropped.
pub struct BinanceStream {
    symbol: String,
    tick_tx: mpsc::Sender<MarketTick>,
}

enum Disconnect {
    /// Server closed the socket; reconnect.
    Remote,
    /// Nobody is listening any more; stop for good.
    ReceiverDropped,
}

impl BinanceStream {
    pub fn new(symbol: impl Into<String>, tick_tx: mpsc::Sender<MarketTick>) -> Self {
        Self {
            symbol: symbol.into(),
            tick_tx,
        }
    }

    /// Run the stream loop, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);

        loop {
            info!(symbol = %self.symbol, "Connecting to Binance WebSocket stream");
            match self.connect_once().await {
                Ok(Disconnect::ReceiverDropped) => {
                    info!(symbol = %self.symbol, "Tick receiver dropped, stream stopping");
                    return;
                }
                Ok(Disconnect::Remote) => {
                    // Binance ends sessions after 24h
                    info!(symbol = %self.symbol, "WebSocket stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "WebSocket error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<Disconnect> {
        let url_str = format!(
            "wss://stream.binance.com:9443/ws/{}@kline_1m",
            self.symbol.to_lowercase()
        );
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_kline_event(&self.symbol, &text) {
                    Ok(Some(tick)) => {
                        if self.tick_tx.send(tick).await.is_err() {
                            return Ok(Disconnect::ReceiverDropped);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %self.symbol, error = %e, "Failed to parse kline event"),
                }
            }
        }

        Ok(Disconnect::Remote)
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "E")]
    event_time_ms: i64,
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse one stream message. Non-kline messages yield `Ok(None)`; a kline
/// with an unreadable price or time is an error rather than a zero price.
fn parse_kline_event(symbol: &str, text: &str) -> Result<Option<MarketTick>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let event: KlineEvent = serde_json::from_value(value)?;

    let price: f64 = event
        .k
        .close
        .parse()
        .map_err(|_| Error::WebSocket(format!("invalid close price '{}'", event.k.close)))?;
    if !(price.is_finite() && price > 0.0) {
        return Err(Error::WebSocket(format!("non-positive close price {price}")));
    }
    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.event_time_ms)
        .single()
        .ok_or_else(|| Error::WebSocket(format!("invalid event time {}", event.event_time_ms)))?;

    Ok(Some(MarketTick {
        instrument: symbol.to_string(),
        price,
        bar_closed: event.k.is_closed,
        timestamp,
    }))
}
