//! Databento historical trades, fetched page by page

use anyhow::{bail, Context, Result};
use databento::{
    dbn::{SType, Schema, TradeMsg, UNDEF_PRICE},
    historical::timeseries::GetRangeParams,
    HistoricalClient,
};
use std::collections::VecDeque;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::TradeSource;
use crate::trading_core::{Side, Trade};

/// CME Globex MDP 3.0
pub const DEFAULT_DATASET: &str = "GLBX.MDP3";

/// What to fetch
#[derive(Debug, Clone)]
pub struct DatabentoParams {
    pub dataset: String,
    /// Raw symbol, e.g. "MESM5"
    pub symbol: String,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// Width of each request window
    pub page: time::Duration,
}

/// Streams trades for `[start, end)`, holding at most one page in memory
pub struct DatabentoSource {
    client: HistoricalClient,
    params: DatabentoParams,
    cursor: OffsetDateTime,
    buffer: VecDeque<Trade>,
    pages_fetched: u64,
    skipped: u64,
}

impl DatabentoSource {
    pub fn new(api_key: &str, params: DatabentoParams) -> Result<Self> {
        if params.end <= params.start {
            bail!("End time {} must be after start time {}", params.end, params.start);
        }
        if params.page <= time::Duration::ZERO {
            bail!("Page window must be positive");
        }

        let client = HistoricalClient::builder()
            .key(api_key)?
            .build()?;

        info!(
            "Databento source: {} {} from {} to {}",
            params.dataset, params.symbol, params.start, params.end
        );

        Ok(Self {
            client,
            cursor: params.start,
            params,
            buffer: VecDeque::new(),
            pages_fetched: 0,
            skipped: 0,
        })
    }

    /// Fetch `[cursor, cursor + page)` into the buffer and advance the cursor
    async fn fetch_page(&mut self) -> Result<()> {
        let page_end = (self.cursor + self.params.page).min(self.params.end);

        let mut decoder = self
            .client
            .timeseries()
            .get_range(
                &GetRangeParams::builder()
                    .dataset(self.params.dataset.as_str())
                    .date_time_range((self.cursor, page_end))
                    .symbols(self.params.symbol.as_str())
                    .stype_in(SType::RawSymbol)
                    .schema(Schema::Trades)
                    .build(),
            )
            .await
            .with_context(|| {
                format!("Failed to fetch trades from Databento ({} to {})", self.cursor, page_end)
            })?;

        let mut count = 0usize;
        let skipped_before = self.skipped;
        while let Some(record) = decoder.decode_record::<TradeMsg>().await? {
            match trade_from_raw(record.hd.ts_event, record.price, record.size, record.side as u8)? {
                Some(trade) => {
                    self.buffer.push_back(trade);
                    count += 1;
                }
                None => self.skipped += 1,
            }
        }

        self.pages_fetched += 1;
        if self.skipped > skipped_before {
            warn!(
                "Skipped {} trades without aggressor side ({} to {})",
                self.skipped - skipped_before,
                self.cursor,
                page_end
            );
        }
        debug!("Page {} ({} to {}): {} trades", self.pages_fetched, self.cursor, page_end, count);
        self.cursor = page_end;
        Ok(())
    }
}

impl TradeSource for DatabentoSource {
    async fn next_trade(&mut self) -> Result<Option<Trade>> {
        while self.buffer.is_empty() && self.cursor < self.params.end {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    fn skipped_records(&self) -> u64 {
        self.skipped
    }
}

/// Convert raw DBN trade fields. Prices are fixed-point 1e-9, timestamps are
/// nanoseconds since the epoch. Trades without an aggressor yield `None`.
pub fn trade_from_raw(ts_event: u64, price: i64, size: u32, side: u8) -> Result<Option<Trade>> {
    let side = match Side::from_databento(side) {
        Some(side) => side,
        None if side == b'N' => return Ok(None),
        None => bail!("Malformed trade at ts_event {}: unknown side {:?}", ts_event, side as char),
    };
    if price == UNDEF_PRICE || price <= 0 {
        bail!("Malformed trade at ts_event {}: undefined or non-positive price {}", ts_event, price);
    }
    if size == 0 {
        bail!("Malformed trade at ts_event {}: zero size", ts_event);
    }
    let ts_nanos = i64::try_from(ts_event)
        .with_context(|| format!("Malformed trade: ts_event {} out of range", ts_event))?;

    Ok(Some(Trade {
        ts_event: chrono::DateTime::from_timestamp_nanos(ts_nanos),
        price: price as f64 / 1_000_000_000.0,
        size: size as u64,
        side,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_trade_from_raw() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 5, 13, 30, 0).unwrap();
        let nanos = ts.timestamp_nanos_opt().unwrap() as u64 + 250_000_000;

        let trade = trade_from_raw(nanos, 5_612_250_000_000, 3, b'B').unwrap().unwrap();
        assert_eq!(trade.price, 5612.25);
        assert_eq!(trade.size, 3);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.ts_event.timestamp_millis(), ts.timestamp_millis() + 250);

        let sell = trade_from_raw(nanos, 5_612_000_000_000, 1, b'A').unwrap().unwrap();
        assert_eq!(sell.side, Side::Sell);
    }

    #[test]
    fn test_no_aggressor_is_skipped() {
        assert!(trade_from_raw(1, 5_600_000_000_000, 1, b'N').unwrap().is_none());
    }

    #[test]
    fn test_malformed_records_fail() {
        assert!(trade_from_raw(1, UNDEF_PRICE, 1, b'B').is_err());
        assert!(trade_from_raw(1, 0, 1, b'B').is_err());
        assert!(trade_from_raw(1, 5_600_000_000_000, 0, b'A').is_err());
        assert!(trade_from_raw(1, 5_600_000_000_000, 1, b'X').is_err());
    }
}
