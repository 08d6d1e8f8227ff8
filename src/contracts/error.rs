// =============================================================================
// Engine error taxonomy — machine-readable kinds shared by every contract
// =============================================================================
//
// Every public fallible operation in the engine returns `EngineError`. Each
// variant maps to a stable wire code so HTTP handlers and report assembly can
// surface errors without string matching. Serialization shape:
//
//   { "error": "...", "code": "PROVIDER_RATE_LIMIT", "data": {...}, "timestamp": "..." }
// =============================================================================

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Borealis engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input from a caller. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A symbol could not be resolved or normalized.
    #[error("symbol resolution failed for '{symbol}'")]
    SymbolResolution {
        symbol: String,
        suggestion: Option<String>,
    },

    /// An upstream provider rejected the request for rate-limit reasons.
    #[error("provider rate limited (retry_after={retry_after_secs:?})")]
    ProviderRateLimit { retry_after_secs: Option<u64> },

    /// The provider returned fewer bars than the analysis requires.
    #[error("insufficient bars: required {required}, received {received}")]
    InsufficientBars { required: usize, received: usize },

    /// Network / transport / decode failure talking to a provider.
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    /// A sub-engine (confluence, bias, risk) failed mid-analysis.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Invalid engine configuration (e.g. weights that do not sum to 1).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cache failure. Never blocks the user path; callers degrade to a miss.
    #[error("cache error: {0}")]
    Cache(String),

    /// The caller cancelled the request before completion.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Shorthand constructor for the most common kind.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::ProviderTransport(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_ARGS",
            Self::SymbolResolution { .. } => "SYMBOL_RESOLUTION",
            Self::ProviderRateLimit { .. } => "PROVIDER_RATE_LIMIT",
            Self::InsufficientBars { .. } => "INSUFFICIENT_BARS",
            Self::ProviderTransport(_) => "PROVIDER_ERROR",
            Self::Analysis(_) => "ANALYSIS_ERROR",
            Self::Configuration(_) => "INTERNAL_ERROR",
            Self::Cache(_) => "INTERNAL_ERROR",
            Self::Cancelled => "INTERNAL_ERROR",
        }
    }

    /// `true` when the composite layer may retry this error on the same
    /// adapter. Validation and symbol errors are terminal; rate limits are
    /// handled separately via `retry_after`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTransport(_))
    }

    /// Structured context for the JSON `data` field, when the variant
    /// carries any.
    fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::SymbolResolution { symbol, suggestion } => Some(json!({
                "symbol": symbol,
                "suggestion": suggestion,
            })),
            Self::ProviderRateLimit { retry_after_secs } => Some(json!({
                "retry_after_secs": retry_after_secs,
            })),
            Self::InsufficientBars { required, received } => Some(json!({
                "required": required,
                "received": received,
            })),
            _ => None,
        }
    }

    /// Serialize into the wire error shape used by the HTTP surface and by
    /// `warnings[]` entries inside reports.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "error": self.to_string(),
            "code": self.code(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(data) = self.data() {
            obj["data"] = data;
        }
        obj
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::validation("x").code(), "INVALID_ARGS");
        assert_eq!(
            EngineError::ProviderRateLimit {
                retry_after_secs: Some(60)
            }
            .code(),
            "PROVIDER_RATE_LIMIT"
        );
        assert_eq!(
            EngineError::InsufficientBars {
                required: 50,
                received: 3
            }
            .code(),
            "INSUFFICIENT_BARS"
        );
        assert_eq!(EngineError::transport("boom").code(), "PROVIDER_ERROR");
        assert_eq!(EngineError::Cancelled.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(EngineError::transport("timeout").is_retryable());
        assert!(!EngineError::validation("bad").is_retryable());
        assert!(!EngineError::ProviderRateLimit {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }

    #[test]
    fn json_shape_carries_code_and_timestamp() {
        let err = EngineError::InsufficientBars {
            required: 78,
            received: 10,
        };
        let v = err.to_json();
        assert_eq!(v["code"], "INSUFFICIENT_BARS");
        assert_eq!(v["data"]["required"], 78);
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn rate_limit_display_mentions_retry_after() {
        let err = EngineError::ProviderRateLimit {
            retry_after_secs: Some(60),
        };
        assert!(err.to_string().contains("60"));
    }
}
