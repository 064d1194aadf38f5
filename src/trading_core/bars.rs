//! Time-bar aggregation with cumulative volume delta
//!
//! Trades are folded into fixed-interval OHLCV bars. A bar stays open (and
//! mutable) until the first trade of the next bucket arrives or the stream
//! ends; only then is it sealed with its CVD snapshot and color.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::trades::Trade;

/// CVD bar color as shown by the Tradovate cumulative delta study
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvdColor {
    Green,
    Red,
    Gray,
}

impl fmt::Display for CvdColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CvdColor::Green => write!(f, "green"),
            CvdColor::Red => write!(f, "red"),
            CvdColor::Gray => write!(f, "gray"),
        }
    }
}

/// How a sealed bar is colored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Close vs open of the bar itself
    Simple,
    /// Close vs the previous sealed bar's high/low ("strong up/down")
    #[default]
    Strong,
}

impl ColorMode {
    /// Classify a bar. `prev_range` is the (high, low) of the previous sealed
    /// bar; strong mode falls back to close-vs-open while it is unknown.
    pub fn classify(self, open: f64, close: f64, prev_range: Option<(f64, f64)>) -> CvdColor {
        match (self, prev_range) {
            (ColorMode::Strong, Some((prev_high, prev_low))) => {
                if close > prev_high {
                    CvdColor::Green
                } else if close < prev_low {
                    CvdColor::Red
                } else {
                    CvdColor::Gray
                }
            }
            _ => {
                if close > open {
                    CvdColor::Green
                } else if close < open {
                    CvdColor::Red
                } else {
                    CvdColor::Gray
                }
            }
        }
    }
}

/// Sealed OHLCV bar with delta and running CVD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Buy-initiated size minus sell-initiated size within the bar
    pub delta: i64,
    /// Running cumulative delta at the bar's close
    pub cvd: i64,
    pub color: CvdColor,
}

struct BarBuilder {
    bucket: i64,
    start_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    delta: i64,
    cvd: i64,
}

impl BarBuilder {
    fn new(bucket: i64, start_time: DateTime<Utc>, trade: &Trade, cvd: i64) -> Self {
        Self {
            bucket,
            start_time,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.size,
            delta: trade.delta(),
            cvd,
        }
    }

    fn add_trade(&mut self, trade: &Trade, cvd: i64) {
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.volume += trade.size;
        self.delta += trade.delta();
        self.cvd = cvd;
    }

    fn to_bar(&self, color: CvdColor) -> Bar {
        Bar {
            start_time: self.start_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            delta: self.delta,
            cvd: self.cvd,
            color,
        }
    }
}

/// Aggregates trades into fixed-interval bars
pub struct BarAggregator {
    interval_ms: i64,
    color_mode: ColorMode,
    current_bar: Option<BarBuilder>,
    running_cvd: i64,
    /// (high, low) of the last sealed bar
    prev_range: Option<(f64, f64)>,
}

impl BarAggregator {
    pub fn new(interval_secs: u64, color_mode: ColorMode) -> Self {
        Self {
            interval_ms: (interval_secs.max(1) as i64) * 1000,
            color_mode,
            current_bar: None,
            running_cvd: 0,
            prev_range: None,
        }
    }

    /// One-minute bars with strong-mode coloring
    pub fn one_minute() -> Self {
        Self::new(60, ColorMode::Strong)
    }

    /// Cumulative delta over every trade seen so far
    pub fn running_cvd(&self) -> i64 {
        self.running_cvd
    }

    pub fn has_open_bar(&self) -> bool {
        self.current_bar.is_some()
    }

    /// Process a trade and return the sealed bar if a new bucket started
    pub fn process_trade(&mut self, trade: &Trade) -> Option<Bar> {
        let ts_ms = trade.ts_event.timestamp_millis();
        let bucket = ts_ms - ts_ms.rem_euclid(self.interval_ms);
        self.running_cvd += trade.delta();

        if let Some(bar) = self.current_bar.as_mut() {
            if bar.bucket == bucket {
                bar.add_trade(trade, self.running_cvd);
                return None;
            }
            if bucket < bar.bucket {
                tracing::warn!(
                    "Out-of-order trade at {} (open bar started {}); starting a new bar",
                    trade.ts_event,
                    bar.start_time
                );
            }
        }

        // New bucket - seal the open bar (if any) and start the next one
        let start_time = DateTime::from_timestamp_millis(bucket).unwrap_or(trade.ts_event);
        let next = BarBuilder::new(bucket, start_time, trade, self.running_cvd);
        self.current_bar.replace(next).map(|done| self.seal(done))
    }

    /// Seal and return the open bar at end of stream
    pub fn flush(&mut self) -> Option<Bar> {
        self.current_bar.take().map(|done| self.seal(done))
    }

    fn seal(&mut self, builder: BarBuilder) -> Bar {
        let color = self
            .color_mode
            .classify(builder.open, builder.close, self.prev_range);
        let bar = builder.to_bar(color);
        self.prev_range = Some((bar.high, bar.low));
        bar
    }
}

impl Default for BarAggregator {
    fn default() -> Self {
        Self::one_minute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::trades::Side;
    use chrono::TimeZone;

    fn trade_at(h: u32, m: u32, s: u32, ms: u32, price: f64, size: u64, side: Side) -> Trade {
        let ts = Utc.with_ymd_and_hms(2025, 5, 5, h, m, s).unwrap()
            + chrono::Duration::milliseconds(ms as i64);
        Trade { ts_event: ts, price, size, side }
    }

    #[test]
    fn test_bar_sealed_on_next_minute() {
        let mut agg = BarAggregator::one_minute();

        assert!(agg.process_trade(&trade_at(10, 0, 0, 100, 5600.0, 1, Side::Buy)).is_none());
        assert!(agg.process_trade(&trade_at(10, 0, 30, 0, 5601.0, 1, Side::Buy)).is_none());

        let bar = agg
            .process_trade(&trade_at(10, 1, 0, 0, 5602.0, 1, Side::Buy))
            .expect("first minute should seal");

        assert_eq!(bar.start_time, Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap());
        assert_eq!(bar.open, 5600.0);
        assert_eq!(bar.high, 5601.0);
        assert_eq!(bar.low, 5600.0);
        assert_eq!(bar.close, 5601.0);
        assert_eq!(bar.volume, 2);
        assert_eq!(bar.delta, 2);
        assert_eq!(bar.cvd, 2);
        assert!(agg.has_open_bar());

        let last = agg.flush().expect("10:01 bar should be open");
        assert_eq!(last.start_time, Utc.with_ymd_and_hms(2025, 5, 5, 10, 1, 0).unwrap());
        assert_eq!(last.volume, 1);
        assert!(agg.flush().is_none());
    }

    #[test]
    fn test_cvd_accumulates_across_bars() {
        let mut agg = BarAggregator::one_minute();
        let trades = [
            trade_at(9, 30, 1, 0, 100.0, 5, Side::Buy),
            trade_at(9, 30, 2, 0, 100.0, 2, Side::Sell),
            trade_at(9, 31, 0, 0, 100.0, 4, Side::Sell),
            trade_at(9, 32, 0, 0, 100.0, 10, Side::Buy),
        ];

        let mut sealed = Vec::new();
        for t in &trades {
            sealed.extend(agg.process_trade(t));
        }
        sealed.extend(agg.flush());

        let cvds: Vec<i64> = sealed.iter().map(|b| b.cvd).collect();
        let deltas: Vec<i64> = sealed.iter().map(|b| b.delta).collect();
        assert_eq!(deltas, vec![3, -4, 10]);
        assert_eq!(cvds, vec![3, -1, 9]);
        assert_eq!(agg.running_cvd(), 9);
    }

    #[test]
    fn test_strong_color_uses_previous_range() {
        let prev = Some((100.0, 95.0));
        assert_eq!(ColorMode::Strong.classify(99.0, 101.0, prev), CvdColor::Green);
        assert_eq!(ColorMode::Strong.classify(99.0, 94.0, prev), CvdColor::Red);
        assert_eq!(ColorMode::Strong.classify(99.0, 97.0, prev), CvdColor::Gray);
    }

    #[test]
    fn test_strong_color_bootstrap_falls_back_to_open_close() {
        assert_eq!(ColorMode::Strong.classify(10.0, 11.0, None), CvdColor::Green);
        assert_eq!(ColorMode::Strong.classify(10.0, 9.0, None), CvdColor::Red);
        assert_eq!(ColorMode::Strong.classify(10.0, 10.0, None), CvdColor::Gray);
    }

    #[test]
    fn test_simple_color_ignores_previous_range() {
        let prev = Some((100.0, 95.0));
        assert_eq!(ColorMode::Simple.classify(97.0, 98.0, prev), CvdColor::Green);
    }

    #[test]
    fn test_aggregator_colors_against_prior_bar() {
        let mut agg = BarAggregator::one_minute();
        agg.process_trade(&trade_at(10, 0, 0, 0, 100.0, 1, Side::Buy));
        agg.process_trade(&trade_at(10, 0, 10, 0, 95.0, 1, Side::Sell));
        agg.process_trade(&trade_at(10, 0, 20, 0, 97.0, 1, Side::Buy));
        // open 100 / close 97 with no prior bar -> red
        let first = agg.process_trade(&trade_at(10, 1, 0, 0, 98.0, 1, Side::Buy)).unwrap();
        assert_eq!(first.color, CvdColor::Red);

        // closes at 101 above the prior high of 100
        agg.process_trade(&trade_at(10, 1, 30, 0, 101.0, 1, Side::Buy));
        let second = agg.flush().unwrap();
        assert_eq!(second.color, CvdColor::Green);
    }
}
