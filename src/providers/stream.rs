// =============================================================================
// Realtime bar feed — websocket stream into bounded subscriber channels
// =============================================================================
//
// Connects to an upstream bar/kline websocket and forwards **closed** bars
// into a bounded `mpsc` channel. Backpressure policy: when a subscriber's
// channel is full the incoming update is dropped (and counted), so a slow
// consumer degrades to a sparser feed instead of stalling the socket task.
//
// Expected message shape (single-stream):
//
//   { "s": "ES", "k": { "t": 1700000000, "o": "...", "h": "...",
//                        "l": "...", "c": "...", "v": "...", "x": true } }
//
// Reconnection is the caller's job: `run_bar_stream` returns on disconnect
// and `StreamManager::spawn_feed` wraps it in the reconnect loop.
// =============================================================================

use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::contracts::{Bar, EngineError, Symbol, Timeframe};

/// Parse a single bar-stream message. Numeric fields tolerate both JSON
/// numbers and decimal strings.
pub fn parse_bar_message(text: &str) -> Result<(String, Bar, bool), EngineError> {
    let root: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EngineError::transport(format!("failed to parse stream JSON: {e}")))?;

    // Tolerate a combined-stream envelope with a `data` wrapper.
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let symbol = data["s"]
        .as_str()
        .ok_or_else(|| EngineError::transport("stream message missing field 's'"))?
        .to_uppercase();

    let k = &data["k"];
    let ts = k["t"]
        .as_i64()
        .ok_or_else(|| EngineError::transport("stream message missing field 'k.t'"))?;
    let timestamp = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| EngineError::transport(format!("stream epoch {ts} out of range")))?;

    let num = |v: &serde_json::Value, name: &str| -> Result<f64, EngineError> {
        match v {
            serde_json::Value::String(s) => s.parse::<f64>().map_err(|_| {
                EngineError::transport(format!("failed to parse stream field '{name}': {s}"))
            }),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| EngineError::transport(format!("stream field '{name}' invalid"))),
            _ => Err(EngineError::transport(format!(
                "stream field '{name}' has unexpected type"
            ))),
        }
    };

    let bar = Bar {
        timestamp,
        open: num(&k["o"], "o")?,
        high: num(&k["h"], "h")?,
        low: num(&k["l"], "l")?,
        close: num(&k["c"], "c")?,
        volume: num(&k["v"], "v")?,
    };

    let is_closed = k["x"].as_bool().unwrap_or(false);
    Ok((symbol, bar, is_closed))
}

/// Connect to `url` and forward closed bars into `sink` until the stream
/// ends or errors. Returns so the caller can decide on reconnection.
pub async fn run_bar_stream(
    url: &str,
    symbol: &Symbol,
    sink: &mpsc::Sender<Bar>,
) -> Result<(), EngineError> {
    info!(url = %url, symbol = %symbol, "connecting to bar stream");

    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| EngineError::transport(format!("websocket connect failed: {e}")))?;

    info!(symbol = %symbol, "bar stream connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_bar_message(&text) {
                        Ok((_sym, bar, is_closed)) => {
                            if !is_closed {
                                continue;
                            }
                            match sink.try_send(bar) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    warn!(symbol = %symbol, "subscriber lagging — bar update dropped");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    info!(symbol = %symbol, "subscriber gone — ending feed");
                                    return Ok(());
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse stream message");
                        }
                    }
                }
                // Ping/Pong/Binary/Close frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(error = %e, "bar stream read error");
                return Err(EngineError::transport(format!("stream read error: {e}")));
            }
            None => {
                warn!(symbol = %symbol, "bar stream ended");
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StreamManager — tracks spawned feed tasks for teardown
// ---------------------------------------------------------------------------

/// Owns the reconnecting feed tasks an adapter has spawned, so
/// `unsubscribe_all` can tear every feed down at once.
pub struct StreamManager {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a feed with a fixed 5-second reconnect backoff. The task runs
    /// until aborted or until the subscriber hangs up.
    pub fn spawn_feed(
        &self,
        url: String,
        symbol: Symbol,
        _timeframe: Timeframe,
        sink: mpsc::Sender<Bar>,
    ) {
        let handle = tokio::spawn(async move {
            loop {
                match run_bar_stream(&url, &symbol, &sink).await {
                    Ok(()) => {
                        if sink.is_closed() {
                            debug!(symbol = %symbol, "feed task exiting — sink closed");
                            return;
                        }
                    }
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "bar stream error — reconnecting in 5s");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Abort every live feed task.
    pub fn abort_all(&self) {
        let mut tasks = self.tasks.lock();
        let n = tasks.len();
        for handle in tasks.drain(..) {
            handle.abort();
        }
        if n > 0 {
            info!(feeds = n, "realtime feeds torn down");
        }
    }

    pub fn active_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.len()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_closed_bar_message() {
        let json = r#"{
            "s": "ES",
            "k": {
                "t": 1700000000,
                "o": "4500.25",
                "h": "4502.00",
                "l": "4499.50",
                "c": "4501.75",
                "v": "1234.5",
                "x": true
            }
        }"#;
        let (sym, bar, closed) = parse_bar_message(json).unwrap();
        assert_eq!(sym, "ES");
        assert!(closed);
        assert!((bar.close - 4501.75).abs() < 1e-9);
        assert_eq!(bar.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parse_combined_stream_envelope() {
        let json = r#"{
            "stream": "es@bars_5m",
            "data": {
                "s": "es",
                "k": { "t": 1700000000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10, "x": false }
            }
        }"#;
        let (sym, _bar, closed) = parse_bar_message(json).unwrap();
        assert_eq!(sym, "ES", "symbol should be uppercased");
        assert!(!closed);
    }

    #[test]
    fn parse_rejects_missing_fields() {
        assert!(parse_bar_message("{}").is_err());
        assert!(parse_bar_message("not json").is_err());
        let no_epoch = r#"{ "s": "ES", "k": { "o": 1.0 } }"#;
        assert!(parse_bar_message(no_epoch).is_err());
    }

    #[tokio::test]
    async fn abort_all_clears_tasks() {
        let mgr = StreamManager::new();
        let (tx, _rx) = mpsc::channel(4);
        mgr.spawn_feed(
            "ws://127.0.0.1:1/never".to_string(),
            Symbol::normalize("ES").unwrap(),
            Timeframe::M1,
            tx,
        );
        assert_eq!(mgr.active_count(), 1);
        mgr.abort_all();
        assert_eq!(mgr.active_count(), 0);
    }
}
