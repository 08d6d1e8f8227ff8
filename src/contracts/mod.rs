// =============================================================================
// Core contracts shared across the Borealis analysis engine
// =============================================================================

pub mod bar;
pub mod error;
pub mod symbol;

pub use bar::{Bar, Timeframe};
pub use error::EngineError;
pub use symbol::{Symbol, SymbolKind};
