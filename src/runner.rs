//! Drives a trade source through the signal engine into a sink

use anyhow::Result;
use std::future::Future;
use tracing::{info, warn};

use crate::report::{EventSink, RunSummary};
use crate::source::TradeSource;
use crate::trading_core::SignalEngine;

/// Pull trades until the source is exhausted or `shutdown` resolves.
///
/// At end of stream the partially built bar is sealed and processed. On
/// shutdown it is dropped, since the bar never actually closed.
pub async fn run<S, K, F>(
    source: &mut S,
    engine: &mut SignalEngine,
    sink: &mut K,
    shutdown: F,
) -> Result<RunSummary>
where
    S: TradeSource,
    K: EventSink,
    F: Future,
{
    tokio::pin!(shutdown);
    let mut summary = RunSummary::default();
    let mut trades: u64 = 0;

    info!(
        "Starting run: window={} interval={}s r_multiple={} tolerance={}",
        engine.config().window_size,
        engine.config().bar_interval_secs,
        engine.config().r_multiple,
        engine.config().breakout_tolerance
    );

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!("Shutdown requested after {} trades; open bar discarded", trades);
                break;
            }
            next = source.next_trade() => next?,
        };

        let Some(trade) = next else {
            for event in engine.finish() {
                summary.record(&event);
                sink.emit(&event)?;
            }
            break;
        };

        trades += 1;
        for event in engine.on_trade(&trade) {
            summary.record(&event);
            sink.emit(&event)?;
        }
    }

    sink.flush()?;
    summary.skipped_records = source.skipped_records();

    info!(
        "Run complete: {} trades, {} bars, {} entries, {} stop-losses, {} take-profits, {} vetoes, {} skipped",
        trades,
        summary.bars,
        summary.entries,
        summary.stop_losses,
        summary.take_profits,
        summary.total_vetoes(),
        summary.skipped_records
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::source::MemorySource;
    use crate::trading_core::{Event, Side, Trade};
    use chrono::{Duration, TimeZone, Utc};

    #[derive(Default)]
    struct Collect(Vec<Event>);

    impl EventSink for Collect {
        fn emit(&mut self, event: &Event) -> Result<()> {
            self.0.push(event.clone());
            Ok(())
        }
    }

    fn trades() -> Vec<Trade> {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 5, 13, 30, 0).unwrap();
        (0..7)
            .map(|i| Trade {
                ts_event: t0 + Duration::seconds(30 * i),
                price: 5600.0 + i as f64,
                size: 1,
                side: if i % 2 == 0 { Side::Buy } else { Side::Sell },
            })
            .collect()
    }

    #[tokio::test]
    async fn test_end_of_stream_flushes_open_bar() {
        let mut source = MemorySource::new(trades());
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let mut sink = Collect::default();

        let summary = run(&mut source, &mut engine, &mut sink, std::future::pending::<()>())
            .await
            .unwrap();

        // 7 trades at 30s spacing cover minutes 0..=3
        assert_eq!(summary.bars, 4);
        assert_eq!(engine.bar_count(), 4);
        assert!(sink.0.iter().all(|e| matches!(e, Event::BarClosed { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_drops_open_bar() {
        let mut source = MemorySource::new(trades());
        let mut engine = SignalEngine::new(StrategyConfig::default());
        let mut sink = Collect::default();

        let summary = run(&mut source, &mut engine, &mut sink, std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(summary.bars, 0);
        assert!(sink.0.is_empty());
    }
}
