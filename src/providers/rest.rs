// =============================================================================
// REST provider — generic JSON OHLCV upstream
// =============================================================================
//
// Speaks the common "bars endpoint" dialect:
//
//   GET {base_url}{path}?symbol=ES&interval=5m&from=...&to=...&limit=...
//
// expecting a JSON array of objects with `t` (epoch seconds) and `o h l c v`
// fields that may arrive either as JSON numbers or as decimal strings
// (several vendors quote them). The API key, when required, travels in a
// header and never in query parameters.
//
// When the requested timeframe is not supported upstream but a finer
// supported one divides it evenly, this adapter fetches the finer series and
// aggregates locally before returning.
// =============================================================================

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::aggregate::aggregate;
use crate::contracts::{bar::sort_dedup, Bar, EngineError, Symbol, Timeframe};
use crate::providers::adapter::{BarProvider, BarsRequest, ProviderCapabilities};
use crate::providers::stream::StreamManager;

/// Static description of one REST upstream.
#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Path of the bars endpoint, e.g. `/v1/bars`.
    pub bars_path: String,
    /// Header used for the API key, e.g. `X-API-KEY`. Empty = no auth.
    pub api_key_header: String,
    pub api_key: String,
    pub supported_timeframes: Vec<Timeframe>,
    pub max_bars_per_request: usize,
    pub request_timeout_secs: u64,
    /// Websocket bar-stream endpoint; `{symbol}` is substituted lowercase.
    /// None = no realtime support.
    pub ws_url: Option<String>,
}

/// REST-backed market-data adapter.
pub struct RestProvider {
    config: RestProviderConfig,
    client: reqwest::Client,
    streams: StreamManager,
}

impl RestProvider {
    pub fn new(config: RestProviderConfig) -> Self {
        let mut default_headers = HeaderMap::new();
        if !config.api_key_header.is_empty() {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(config.api_key_header.as_bytes()),
                HeaderValue::from_str(&config.api_key),
            ) {
                default_headers.insert(name, value);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to build reqwest client");

        debug!(name = %config.name, base_url = %config.base_url, "RestProvider initialised");

        Self {
            config,
            client,
            streams: StreamManager::new(),
        }
    }

    fn bars_url(&self, req: &BarsRequest, tf: Timeframe) -> String {
        let mut url = format!(
            "{}{}?symbol={}&interval={}",
            self.config.base_url, self.config.bars_path, req.symbol.canonical, tf
        );
        if let Some(from) = req.from {
            url.push_str(&format!("&from={}", from.timestamp()));
        }
        if let Some(to) = req.to {
            url.push_str(&format!("&to={}", to.timestamp()));
        }
        let limit = req
            .limit
            .unwrap_or(self.config.max_bars_per_request)
            .min(self.config.max_bars_per_request);
        url.push_str(&format!("&limit={limit}"));
        url
    }

    async fn fetch_raw(&self, req: &BarsRequest, tf: Timeframe) -> Result<Vec<Bar>, EngineError> {
        let url = self.bars_url(req, tf);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transport(format!("GET bars failed: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(EngineError::ProviderRateLimit { retry_after_secs });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::transport(format!("failed to parse bars response: {e}")))?;

        if !status.is_success() {
            return Err(EngineError::transport(format!(
                "upstream {} returned {status}: {body}",
                self.config.name
            )));
        }

        let rows = body
            .as_array()
            .ok_or_else(|| EngineError::transport("bars response is not an array"))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            bars.push(parse_bar_row(row)?);
        }
        Ok(sort_dedup(bars))
    }
}

/// Parse one bar object, tolerating string-or-number numerics.
fn parse_bar_row(row: &serde_json::Value) -> Result<Bar, EngineError> {
    let ts = row["t"]
        .as_i64()
        .ok_or_else(|| EngineError::transport("bar row missing epoch field 't'"))?;
    let timestamp = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| EngineError::transport(format!("bar epoch {ts} out of range")))?;

    let bar = Bar {
        timestamp,
        open: parse_number(&row["o"], "o")?,
        high: parse_number(&row["h"], "h")?,
        low: parse_number(&row["l"], "l")?,
        close: parse_number(&row["c"], "c")?,
        volume: parse_number(&row["v"], "v")?,
    };
    bar.validate()?;
    Ok(bar)
}

/// Vendors send numerics either as JSON numbers or as decimal strings.
fn parse_number(val: &serde_json::Value, name: &str) -> Result<f64, EngineError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| EngineError::transport(format!("failed to parse field '{name}': {s}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::transport(format!("field '{name}' is not a valid f64"))),
        _ => Err(EngineError::transport(format!(
            "field '{name}' has unexpected JSON type"
        ))),
    }
}

#[async_trait]
impl BarProvider for RestProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_timeframes: self.config.supported_timeframes.clone(),
            max_bars_per_request: self.config.max_bars_per_request,
            needs_auth: !self.config.api_key_header.is_empty(),
            rate_limit_per_minute: 0,
            historical_from: None,
            supports_extended_hours: true,
            supports_realtime: self.config.ws_url.is_some(),
        }
    }

    async fn get_bars(&self, req: &BarsRequest) -> Result<Vec<Bar>, EngineError> {
        req.validate()?;
        let caps = self.capabilities();

        if caps.supports(req.timeframe) {
            let bars = self.fetch_raw(req, req.timeframe).await?;
            return Ok(req.clip(bars));
        }

        // Unsupported timeframe: fetch the coarsest finer divisor and fold.
        let Some(source_tf) = caps.finer_source_for(req.timeframe) else {
            return Err(EngineError::validation(format!(
                "provider '{}' supports neither {} nor a finer divisor",
                self.config.name, req.timeframe
            )));
        };
        warn!(
            provider = %self.config.name,
            requested = %req.timeframe,
            source = %source_tf,
            "timeframe unsupported upstream — fetching finer and aggregating"
        );

        // Widen the fetch so the limit still yields enough coarse buckets.
        let ratio = (req.timeframe.seconds() / source_tf.seconds()) as usize;
        let mut finer_req = req.clone();
        finer_req.timeframe = source_tf;
        finer_req.limit = req.limit.map(|l| l.saturating_mul(ratio));

        let finer = self.fetch_raw(&finer_req, source_tf).await?;
        let folded = aggregate(&finer, source_tf, req.timeframe, false)?;
        Ok(req.clip(folded))
    }

    async fn subscribe(
        &self,
        symbol: &Symbol,
        sink: mpsc::Sender<Bar>,
    ) -> Result<(), EngineError> {
        let Some(template) = &self.config.ws_url else {
            return Err(EngineError::validation(format!(
                "provider '{}' has no websocket endpoint configured",
                self.config.name
            )));
        };
        let url = template.replace("{symbol}", &symbol.canonical.to_lowercase());
        self.streams
            .spawn_feed(url, symbol.clone(), Timeframe::M1, sink);
        Ok(())
    }

    async fn unsubscribe_all(&self) {
        self.streams.abort_all();
    }
}

// =============================================================================
// Tests
// =============================================================================
