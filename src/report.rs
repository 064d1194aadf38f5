//! Event reporting
//!
//! The engine never prints; every run feeds its events into an [`EventSink`].
//! `TextSink` renders the human-readable console log, `JsonLinesSink` writes
//! one JSON object per event for downstream tooling.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::trading_core::{Event, ExitReason};

/// Default display timezone for bar times
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;

pub trait EventSink {
    fn emit(&mut self, event: &Event) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Human-readable log, one block per bar
pub struct TextSink<W: Write> {
    out: W,
    tz: Tz,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W, tz: Tz) -> Self {
        Self { out, tz }
    }

    fn clock(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.tz).format("%I:%M:%S %p").to_string()
    }
}

impl<W: Write> EventSink for TextSink<W> {
    fn emit(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::BarClosed { index, bar } => {
                let time = self.clock(bar.start_time);
                writeln!(
                    self.out,
                    "#{:<3} {} | O:{:.2} H:{:.2} L:{:.2} C:{:.2} Vol:{} CVD:{} Color:{}",
                    index, time, bar.open, bar.high, bar.low, bar.close, bar.volume, bar.cvd, bar.color
                )?;
            }
            Event::Exit { time, direction, reason, reference_price, .. } => {
                let label = match reason {
                    ExitReason::StopLoss => "stop",
                    ExitReason::TakeProfit => "target",
                };
                writeln!(
                    self.out,
                    "  → {} {} @ {} | {} was {:.2}\n",
                    reason,
                    direction,
                    self.clock(*time),
                    label,
                    reference_price
                )?;
            }
            Event::Holding { direction, .. } => {
                writeln!(self.out, "    → in position ({}), waiting for exit\n", direction)?;
            }
            Event::Filtered { veto, .. } => {
                writeln!(self.out, "    → filtered: {}", veto)?;
            }
            Event::Entry { position, .. } => {
                writeln!(self.out, "    → ENTRY SIGNAL: {}", position.direction)?;
                writeln!(self.out, "       Stop price:   {:.2}", position.stop_price)?;
                writeln!(self.out, "       Target price: {:.2}\n", position.target_price)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush report output")
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &Event) -> Result<()> {
        serde_json::to_writer(&mut self.out, event).context("Failed to serialize event")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush report output")
    }
}

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub bars: usize,
    pub entries: usize,
    pub stop_losses: usize,
    pub take_profits: usize,
    /// Veto counts keyed by reason code
    pub vetoes: BTreeMap<&'static str, usize>,
    /// Trades dropped for having no aggressor side
    pub skipped_records: u64,
}

impl RunSummary {
    pub fn record(&mut self, event: &Event) {
        match event {
            Event::BarClosed { .. } => self.bars += 1,
            Event::Entry { .. } => self.entries += 1,
            Event::Exit { reason: ExitReason::StopLoss, .. } => self.stop_losses += 1,
            Event::Exit { reason: ExitReason::TakeProfit, .. } => self.take_profits += 1,
            Event::Filtered { veto, .. } => *self.vetoes.entry(veto.code()).or_default() += 1,
            Event::Holding { .. } => {}
        }
    }

    pub fn total_vetoes(&self) -> usize {
        self.vetoes.values().sum()
    }
}
