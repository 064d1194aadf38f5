// Library crate - CVD trendline breakout engine and its trade sources

pub mod trading_core;
pub mod config;
pub mod source;
pub mod report;
pub mod runner;

// Re-export commonly used types
pub use config::StrategyConfig;
pub use report::{EventSink, JsonLinesSink, RunSummary, TextSink};
pub use runner::run;
pub use source::{MemorySource, TradeSource};
pub use trading_core::{Event, SignalEngine};
