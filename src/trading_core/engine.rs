//! Signal Engine
//!
//! Owns every piece of mutable pipeline state (bar aggregator, rolling
//! window, position manager) and advances it one trade at a time. Each sealed
//! bar runs through, in order:
//!
//! 1. exit check on the open position (an exit consumes the bar)
//! 2. rolling window update
//! 3. trendline fit + breakout classification (window full, flat only)
//! 4. filter chain
//! 5. entry

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::bars::{Bar, BarAggregator};
use super::filters::{apply_filters, FilterContext, Veto};
use super::risk::{Direction, ExitReason, Position, RiskManager};
use super::trades::Trade;
use super::trendline::{Breakout, Trendlines};
use super::window::RollingWindow;
use crate::config::StrategyConfig;

/// Everything the engine reports, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A bar was sealed (1-based index)
    BarClosed { index: usize, bar: Bar },
    /// The open position hit its stop or target on this bar
    Exit {
        index: usize,
        time: DateTime<Utc>,
        direction: Direction,
        reason: ExitReason,
        reference_price: f64,
    },
    /// Window is full but a position is open; no entry evaluated
    Holding { index: usize, direction: Direction },
    /// A raw breakout was rejected by the filter chain
    Filtered { index: usize, breakout: Breakout, veto: Veto },
    /// A confirmed breakout opened a position
    Entry {
        index: usize,
        time: DateTime<Utc>,
        position: Position,
    },
}

pub struct SignalEngine {
    config: StrategyConfig,
    aggregator: BarAggregator,
    window: RollingWindow,
    risk: RiskManager,
    bar_count: usize,
}

impl SignalEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            aggregator: BarAggregator::new(config.bar_interval_secs, config.color_mode),
            window: RollingWindow::new(config.window_size),
            risk: RiskManager::new(config.r_multiple, config.reset_reversal_on_exit),
            bar_count: 0,
            config,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Number of bars sealed so far
    pub fn bar_count(&self) -> usize {
        self.bar_count
    }

    /// Feed one trade; emits events only when it seals a bar
    pub fn on_trade(&mut self, trade: &Trade) -> Vec<Event> {
        match self.aggregator.process_trade(trade) {
            Some(bar) => self.on_bar(bar),
            None => Vec::new(),
        }
    }

    /// End of stream: seal and process the open bar, if any
    pub fn finish(&mut self) -> Vec<Event> {
        match self.aggregator.flush() {
            Some(bar) => self.on_bar(bar),
            None => Vec::new(),
        }
    }

    /// Run one sealed bar through exits, window, trendlines, filters, entries
    pub fn on_bar(&mut self, bar: Bar) -> Vec<Event> {
        self.bar_count += 1;
        let index = self.bar_count;
        let time = bar.start_time;
        let mut events = Vec::with_capacity(2);

        let exit = self.risk.check_exit(&bar);
        if exit.is_none() {
            self.window.push(&bar);
        }
        events.push(Event::BarClosed { index, bar });

        if let Some(exit) = exit {
            events.push(Event::Exit {
                index,
                time,
                direction: exit.position.direction,
                reason: exit.reason,
                reference_price: exit.reference_price,
            });
            return events;
        }

        if !self.window.is_full() {
            return events;
        }

        if let Some(position) = self.risk.position() {
            events.push(Event::Holding { index, direction: position.direction });
            return events;
        }

        let values = self.window.cvd_series();
        let Some(lines) = Trendlines::fit(&values) else {
            return events;
        };
        let raw = lines.classify(&values, self.config.breakout_tolerance);
        debug!(
            "Bar #{} trendlines: support slope={:.4} resistance slope={:.4} breakout={:?}",
            index, lines.support.slope, lines.resistance.slope, raw
        );

        let Some(raw) = raw else {
            return events;
        };

        let ctx = FilterContext {
            lines: &lines,
            window: &self.window,
            last_signal: self.risk.last_signal(),
        };
        match apply_filters(raw, &ctx) {
            Ok(confirmed) => {
                if let Some(position) = self.risk.enter(confirmed, &self.window) {
                    events.push(Event::Entry { index, time, position });
                }
            }
            Err(veto) => {
                events.push(Event::Filtered { index, breakout: raw, veto });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::CvdColor;
    use crate::trading_core::trades::Side;
    use chrono::{Duration, TimeZone};

    fn bar(minute: i64, close: f64, volume: u64, cvd: i64) -> Bar {
        Bar {
            start_time: Utc.with_ymd_and_hms(2025, 5, 5, 13, 30, 0).unwrap() + Duration::minutes(minute),
            open: close,
            high: close + 0.25,
            low: close - 0.25,
            close,
            volume,
            delta: 0,
            cvd,
            color: CvdColor::Gray,
        }
    }

    /// Five bars ending in a confirmed bullish breakout
    fn warm_up(engine: &mut SignalEngine) -> Vec<Event> {
        let setup = [
            (100.0, 10, 0),
            (101.0, 10, 10),
            (100.5, 10, 20),
            (101.5, 10, 30),
            (103.0, 20, 60),
        ];
        let mut events = Vec::new();
        for (i, &(close, volume, cvd)) in setup.iter().enumerate() {
            events.extend(engine.on_bar(bar(i as i64, close, volume, cvd)));
        }
        events
    }

    #[test]
    fn test_no_decisions_until_window_full() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        for i in 0..4 {
            let events = engine.on_bar(bar(i, 100.0 + i as f64, 10, i * 10));
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], Event::BarClosed { .. }));
        }
        assert!(!engine.window().is_full());
    }

    #[test]
    fn test_confirmed_breakout_opens_long() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let events = warm_up(&mut engine);

        let entry = events.iter().find_map(|e| match e {
            Event::Entry { index, position, .. } => Some((*index, *position)),
            _ => None,
        });
        let (index, position) = entry.expect("bullish entry on bar 5");
        assert_eq!(index, 5);
        assert_eq!(position.direction, Direction::Long);
        assert_eq!(position.entry_price, 103.0);
        assert_eq!(position.stop_price, 100.0);
        assert_eq!(position.target_price, 109.0);
    }

    #[test]
    fn test_holding_then_stop_then_reversal_veto() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        warm_up(&mut engine);

        // Inside the stop/target range: keeps holding
        let events = engine.on_bar(bar(5, 104.0, 10, 70));
        assert_eq!(events[1], Event::Holding { index: 6, direction: Direction::Long });

        // Low of 99.75 breaches the 100 stop; the bar never reaches the window
        let before = engine.window().cvd_series();
        let mut stop_bar = bar(6, 100.0, 10, 75);
        stop_bar.high = 110.0;
        let events = engine.on_bar(stop_bar);
        match &events[1] {
            Event::Exit { reason, reference_price, direction, .. } => {
                assert_eq!(*reason, ExitReason::StopLoss);
                assert_eq!(*reference_price, 100.0);
                assert_eq!(*direction, Direction::Long);
            }
            other => panic!("expected exit, got {:?}", other),
        }
        assert_eq!(engine.window().cvd_series(), before);
        assert!(engine.risk().is_flat());

        // Another bullish break is blocked until a bearish entry happens
        let events = engine.on_bar(bar(7, 106.0, 40, 200));
        assert_eq!(
            events[1],
            Event::Filtered { index: 8, breakout: Breakout::Bullish, veto: Veto::AwaitingReversal }
        );
    }

    #[test]
    fn test_bearish_entry_stop_then_reversal_veto() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let setup = [
            (100.0, 10, 0),
            (99.0, 10, 10),
            (99.5, 10, 20),
            (98.5, 10, 30),
            (97.0, 20, -20),
        ];
        let mut events = Vec::new();
        for (i, &(close, volume, cvd)) in setup.iter().enumerate() {
            events.extend(engine.on_bar(bar(i as i64, close, volume, cvd)));
        }

        // Stop at the window's highest close, target 2R below entry
        let position = events
            .iter()
            .find_map(|e| match e {
                Event::Entry { index: 5, position, .. } => Some(*position),
                _ => None,
            })
            .expect("bearish entry on bar 5");
        assert_eq!(position.direction, Direction::Short);
        assert_eq!(position.entry_price, 97.0);
        assert_eq!(position.stop_price, 100.0);
        assert_eq!(position.target_price, 91.0);

        let events = engine.on_bar(bar(5, 96.0, 10, -30));
        assert_eq!(events[1], Event::Holding { index: 6, direction: Direction::Short });

        // High reaches the 100 stop
        let mut stop_bar = bar(6, 98.0, 10, -25);
        stop_bar.high = 100.0;
        let events = engine.on_bar(stop_bar);
        match &events[1] {
            Event::Exit { reason, reference_price, direction, .. } => {
                assert_eq!(*reason, ExitReason::StopLoss);
                assert_eq!(*reference_price, 100.0);
                assert_eq!(*direction, Direction::Short);
            }
            other => panic!("expected exit, got {:?}", other),
        }
        assert!(engine.risk().is_flat());

        // CVD collapses again; a second short waits for a long first
        let events = engine.on_bar(bar(7, 90.0, 40, -200));
        assert_eq!(
            events[1],
            Event::Filtered { index: 8, breakout: Breakout::Bearish, veto: Veto::AwaitingReversal }
        );
    }

    #[test]
    fn test_trades_drive_bars() {
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let t0 = Utc.with_ymd_and_hms(2025, 5, 5, 13, 30, 0).unwrap();
        let trades = [
            Trade { ts_event: t0, price: 5600.0, size: 2, side: Side::Buy },
            Trade { ts_event: t0 + Duration::seconds(20), price: 5601.0, size: 1, side: Side::Sell },
            Trade { ts_event: t0 + Duration::seconds(61), price: 5602.0, size: 4, side: Side::Buy },
        ];

        let mut events = Vec::new();
        for t in &trades {
            events.extend(engine.on_trade(t));
        }
        assert_eq!(events.len(), 1);
        events.extend(engine.finish());
        assert_eq!(engine.bar_count(), 2);

        let cvds: Vec<i64> = events
            .iter()
            .filter_map(|e| match e {
                Event::BarClosed { bar, .. } => Some(bar.cvd),
                _ => None,
            })
            .collect();
        assert_eq!(cvds, vec![1, 5]);
    }
}
