//! Types library for the market data hub
//!
//! Shared definitions used by the synchronization core and the gateway,
//! so that both sides agree on symbols, decimal levels and error kinds.
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, SinkId)
//! - `numeric`: Exact decimal types (Price, Quantity)
//! - `book`: Book sides and raw wire levels
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod book;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::book::*;
    pub use crate::errors::*;
}
