// =============================================================================
// Symbol normalization — stocks, continuous futures, dated contracts
// =============================================================================
//
// Canonical form is trimmed uppercase. Classification:
//   - `^([A-Z]{1,4})(F|G|H|J|K|M|N|Q|U|V|X|Z)(\d{2,4})$`  → dated future
//     contract; the year is normalized to its last two digits.
//   - A bare known root (ES, NQ, ...)                      → continuous future
//   - Anything else                                        → stock
// =============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::contracts::error::EngineError;

/// Futures month codes in calendar order.
pub const MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

/// Roots treated as continuous futures when given bare.
const KNOWN_FUTURE_ROOTS: [&str; 13] = [
    "ES", "NQ", "YM", "RTY", "GC", "SI", "HG", "CL", "ZB", "ZN", "ZF", "ZT", "VX",
];

static CONTRACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]{1,4})(F|G|H|J|K|M|N|Q|U|V|X|Z)(\d{2,4})$")
        .expect("contract regex is valid")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Classification of a normalized symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SymbolKind {
    Stock,
    ContinuousFuture { root: String },
    FutureContract {
        root: String,
        month_code: char,
        year: u8,
    },
}

/// A normalized, classified trading symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Canonical uppercase form (e.g. `"ES"`, `"ESH25"`, `"SPY"`).
    pub canonical: String,
    pub kind: SymbolKind,
}

impl Symbol {
    /// Normalize raw user/provider input into a canonical classified symbol.
    ///
    /// Normalization is idempotent: feeding the canonical form back in yields
    /// an identical result.
    pub fn normalize(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::SymbolResolution {
                symbol: raw.to_string(),
                suggestion: None,
            });
        }
        let upper = trimmed.to_ascii_uppercase();

        if !upper
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(EngineError::SymbolResolution {
                symbol: raw.to_string(),
                suggestion: Some(upper.chars().filter(|c| c.is_ascii_alphanumeric()).collect()),
            });
        }

        if let Some(caps) = CONTRACT_RE.captures(&upper) {
            let root = caps[1].to_string();
            let month_code = caps[2].chars().next().expect("regex guarantees one char");
            let digits = &caps[3];
            // Normalize 4-digit (2025) and 3-digit (025) years down to the
            // last two digits.
            let year: u8 = digits[digits.len().saturating_sub(2)..]
                .parse()
                .map_err(|_| EngineError::SymbolResolution {
                    symbol: raw.to_string(),
                    suggestion: None,
                })?;
            let canonical = format!("{root}{month_code}{year:02}");
            return Ok(Symbol {
                canonical,
                kind: SymbolKind::FutureContract {
                    root,
                    month_code,
                    year,
                },
            });
        }

        if KNOWN_FUTURE_ROOTS.contains(&upper.as_str()) {
            return Ok(Symbol {
                canonical: upper.clone(),
                kind: SymbolKind::ContinuousFuture { root: upper },
            });
        }

        Ok(Symbol {
            canonical: upper,
            kind: SymbolKind::Stock,
        })
    }

    /// The instrument root: contract/continuous root, or the canonical form
    /// itself for stocks. Exchange-timezone resolution keys off this.
    pub fn root(&self) -> &str {
        match &self.kind {
            SymbolKind::Stock => &self.canonical,
            SymbolKind::ContinuousFuture { root } => root,
            SymbolKind::FutureContract { root, .. } => root,
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

// =============================================================================
// Tests
// =============================================================================
