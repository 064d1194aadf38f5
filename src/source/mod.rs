//! Trade sources
//!
//! Every source is pulled one trade at a time and yields trades in
//! non-decreasing timestamp order. Transport and parse failures end the run.

pub mod historical;
pub mod file;

use anyhow::Result;
use std::future::Future;

use crate::trading_core::Trade;

pub use self::historical::{DatabentoParams, DatabentoSource};
pub use self::file::{find_trade_files, CsvTradeSource};

pub trait TradeSource {
    /// Next trade, or `None` once the stream is exhausted
    fn next_trade(&mut self) -> impl Future<Output = Result<Option<Trade>>>;

    /// Records dropped because they carry no aggressor side
    fn skipped_records(&self) -> u64 {
        0
    }
}

/// In-memory source over any iterator of trades
pub struct MemorySource<I> {
    trades: I,
}

impl<I: Iterator<Item = Trade>> MemorySource<I> {
    pub fn new(trades: impl IntoIterator<IntoIter = I>) -> Self {
        Self { trades: trades.into_iter() }
    }
}

impl<I: Iterator<Item = Trade>> TradeSource for MemorySource<I> {
    async fn next_trade(&mut self) -> Result<Option<Trade>> {
        Ok(self.trades.next())
    }
}
