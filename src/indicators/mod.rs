// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator implementations used by the analysis
// engines.  Every public function returns `Option<T>` so callers are forced
// to handle insufficient-data and numerical-edge-case scenarios.

pub mod atr;
pub mod ema;
