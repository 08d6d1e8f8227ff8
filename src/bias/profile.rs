// =============================================================================
// Day profile classification — session-sweep driven P1/P2/P3 readout
// =============================================================================
//
// The profile describes how the day is unfolding relative to the overnight
// sessions:
//
//   P1 reversal     — the London extreme was swept after London closed
//   P2 expansion    — the Asia extreme was swept (London left alone)
//   P3 continuation — neither overnight extreme has been taken
//
// Session windows come from the calendar; extremes are computed over the
// bars inside each window and sweeps are tested against the bars that
// printed after the window closed.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{session_extremes, SessionBoundary};
use crate::contracts::Bar;

/// Day profile labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayProfile {
    /// London extreme swept — reversal conditions.
    P1Reversal,
    /// Asia extreme swept — expansion conditions.
    P2Expansion,
    /// No overnight extreme taken — continuation conditions.
    P3Continuation,
    /// Not enough session data to classify.
    Unknown,
}

impl std::fmt::Display for DayProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P1Reversal => write!(f, "P1-reversal"),
            Self::P2Expansion => write!(f, "P2-expansion"),
            Self::P3Continuation => write!(f, "P3-continuation"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify the day from session extremes and post-session price action.
pub fn classify(bars: &[Bar], boundaries: &[SessionBoundary]) -> DayProfile {
    let extremes = session_extremes(bars, boundaries);
    let find = |name: &str| {
        boundaries
            .iter()
            .find(|b| b.name == name)
            .and_then(|b| extremes.iter().find(|e| e.name == name).map(|e| (b, e)))
    };

    let asia = find("asia");
    let london = find("london");

    if asia.is_none() && london.is_none() {
        return DayProfile::Unknown;
    }

    // Sweeps are judged on the action after the overnight block as a whole;
    // London taking out the Asia range is ordinary overlap, not a sweep.
    let eval_start = asia
        .iter()
        .chain(london.iter())
        .map(|(b, _)| b.end)
        .max()
        .expect("at least one session present");

    let swept = |pair: Option<(&SessionBoundary, &crate::calendar::SessionExtremes)>| {
        pair.map(|(_, ext)| {
            bars.iter()
                .filter(|bar| bar.timestamp >= eval_start)
                .any(|bar| bar.high > ext.high || bar.low < ext.low)
        })
        .unwrap_or(false)
    };

    let london_swept = swept(london);
    let asia_swept = swept(asia);

    debug!(asia_swept, london_swept, "day profile sweep check");

    if london_swept {
        DayProfile::P1Reversal
    } else if asia_swept {
        DayProfile::P2Expansion
    } else {
        DayProfile::P3Continuation
    }
}

// =============================================================================
// Tests
// =============================================================================
