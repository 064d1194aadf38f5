//! Position and risk state machine
//!
//! States:
//! 1. FLAT - no position, entries may be evaluated
//! 2. LONG / SHORT - one open position; every new bar is checked against the
//!    stop first, then the target. No new entries until flat again.
//!
//! Stops sit at the window's extreme close; targets are `r_multiple` times the
//! stop distance on the other side of the entry.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::bars::Bar;
use super::trendline::Breakout;
use super::window::RollingWindow;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl From<Breakout> for Direction {
    fn from(breakout: Breakout) -> Self {
        match breakout {
            Breakout::Bullish => Direction::Long,
            Breakout::Bearish => Direction::Short,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// State of the position manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP-LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE-PROFIT"),
        }
    }
}

/// Open position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

impl Position {
    /// Build a position with a stop at `stop_price` and a target
    /// `r_multiple` stop-distances away on the profit side
    pub fn new(direction: Direction, entry_price: f64, stop_price: f64, r_multiple: f64) -> Self {
        let risk = match direction {
            Direction::Long => entry_price - stop_price,
            Direction::Short => stop_price - entry_price,
        };
        let target_price = match direction {
            Direction::Long => entry_price + risk * r_multiple,
            Direction::Short => entry_price - risk * r_multiple,
        };
        Self { direction, entry_price, stop_price, target_price }
    }

    /// Stop/target check for one bar; the stop is checked first
    pub fn check_exit(&self, bar: &Bar) -> Option<(ExitReason, f64)> {
        match self.direction {
            Direction::Long => {
                if bar.low <= self.stop_price {
                    Some((ExitReason::StopLoss, self.stop_price))
                } else if bar.high >= self.target_price {
                    Some((ExitReason::TakeProfit, self.target_price))
                } else {
                    None
                }
            }
            Direction::Short => {
                if bar.high >= self.stop_price {
                    Some((ExitReason::StopLoss, self.stop_price))
                } else if bar.low <= self.target_price {
                    Some((ExitReason::TakeProfit, self.target_price))
                } else {
                    None
                }
            }
        }
    }
}

/// Closed position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionExit {
    pub position: Position,
    pub reason: ExitReason,
    /// Stop or target level that was hit
    pub reference_price: f64,
}

/// Tracks at most one position plus the direction of the last taken entry
#[derive(Debug, Clone)]
pub struct RiskManager {
    r_multiple: f64,
    reset_reversal_on_exit: bool,
    position: Option<Position>,
    last_signal: Option<Breakout>,
}

impl RiskManager {
    pub fn new(r_multiple: f64, reset_reversal_on_exit: bool) -> Self {
        Self {
            r_multiple,
            reset_reversal_on_exit,
            position: None,
            last_signal: None,
        }
    }

    pub fn state(&self) -> PositionState {
        match self.position.map(|p| p.direction) {
            None => PositionState::Flat,
            Some(Direction::Long) => PositionState::Long,
            Some(Direction::Short) => PositionState::Short,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Direction of the most recently taken entry
    pub fn last_signal(&self) -> Option<Breakout> {
        self.last_signal
    }

    /// Check the open position against a new bar, closing it on a hit
    pub fn check_exit(&mut self, bar: &Bar) -> Option<PositionExit> {
        let position = self.position?;
        let (reason, reference_price) = position.check_exit(bar)?;

        self.position = None;
        if self.reset_reversal_on_exit {
            self.last_signal = None;
        }
        Some(PositionExit { position, reason, reference_price })
    }

    /// Open a position on a confirmed breakout at the window's latest close.
    /// Returns `None` if a position is already open or the window is empty.
    pub fn enter(&mut self, breakout: Breakout, window: &RollingWindow) -> Option<Position> {
        if self.position.is_some() {
            return None;
        }

        let entry_price = window.latest_close()?;
        let stop_price = match breakout {
            Breakout::Bullish => window.min_close()?,
            Breakout::Bearish => window.max_close()?,
        };

        let position = Position::new(breakout.into(), entry_price, stop_price, self.r_multiple);
        self.position = Some(position);
        self.last_signal = Some(breakout);
        Some(position)
    }
}
