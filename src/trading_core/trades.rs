//! Trade types for trading core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single trade print from market data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ts_event: DateTime<Utc>,
    pub price: f64,
    pub size: u64,
    pub side: Side,
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Map a Databento side code: 'B' = buy aggressor, 'A' = sell aggressor.
    /// Any other code yields `None`. The only other valid code is 'N' (no
    /// aggressor), which callers skip; anything else is malformed.
    pub fn from_databento(code: u8) -> Option<Self> {
        match code {
            b'B' => Some(Side::Buy),
            b'A' => Some(Side::Sell),
            _ => None,
        }
    }
}

impl Trade {
    /// Signed contribution of this trade to cumulative delta
    pub fn delta(&self) -> i64 {
        match self.side {
            Side::Buy => self.size as i64,
            Side::Sell => -(self.size as i64),
        }
    }
}
