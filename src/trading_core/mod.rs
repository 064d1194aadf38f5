//! Trading Core - CVD trendline breakout strategy
//!
//! This module contains the core strategy components:
//! - Bar aggregation with cumulative volume delta
//! - Rolling window of recent bars
//! - Constrained support/resistance trendline fitting
//! - Breakout confirmation filters
//! - Position/risk state machine
//! - Signal engine tying them together

pub mod trades;
pub mod bars;
pub mod window;
pub mod trendline;
pub mod filters;
pub mod risk;
pub mod engine;

// Re-export commonly used types
pub use trades::{Trade, Side};
pub use bars::{Bar, BarAggregator, ColorMode, CvdColor};
pub use window::RollingWindow;
pub use trendline::{Breakout, LineFit, LineKind, TrendLine, Trendlines};
pub use filters::{apply_filters, Filter, FilterContext, Veto, FILTER_CHAIN};
pub use risk::{Direction, ExitReason, Position, PositionExit, PositionState, RiskManager};
pub use engine::{Event, SignalEngine};
