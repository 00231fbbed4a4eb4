//! ValutaTrade Common Types
//!
//! Value types shared across the ValutaTrade workspace: currency codes,
//! directional currency pairs and their `BASE_QUOTE` keys, the currency
//! registry, timestamps, and history/cycle identifiers.

pub mod currency;
pub mod error;
pub mod identifiers;
pub mod time;

pub use currency::*;
pub use error::*;
pub use identifiers::*;
pub use time::*;
