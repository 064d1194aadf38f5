//! Trades from Databento CSV exports
//!
//! Files may be plain `.csv` or zstd-compressed `.csv.zst` (the batch download
//! format). Rows are decoded lazily, one at a time; prices must be decimal
//! (`pretty_px`) and timestamps either RFC 3339 (`pretty_ts`) or integer
//! nanoseconds.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::TradeSource;
use crate::trading_core::{Side, Trade};

/// Columns we use from the Databento trades schema; the rest are ignored
#[derive(Debug, Deserialize)]
struct CsvRow {
    ts_event: String,
    action: String,
    side: String,
    price: f64,
    size: u64,
    symbol: String,
}

type Rows = csv::DeserializeRecordsIntoIter<Box<dyn Read>, CsvRow>;

/// Find all trade files (`.zst` / `.csv`) in a directory, optionally filtered
/// by a substring of the filename (e.g. a YYYYMMDD date)
pub fn find_trade_files(data_dir: &Path, name_filter: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(data_dir)
        .with_context(|| format!("Failed to read directory: {:?}", data_dir))?
    {
        let path = entry?.path();
        let is_trade_file = path
            .extension()
            .map_or(false, |ext| ext == "zst" || ext == "csv");
        if !is_trade_file {
            continue;
        }
        if let Some(filter) = name_filter {
            let matches = path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().contains(filter));
            if !matches {
                continue;
            }
        }
        files.push(path);
    }

    files.sort();
    Ok(files)
}

/// Open a trade file, decompressing `.zst` transparently
pub fn open_trade_file(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    if path.extension().map_or(false, |ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streams trades from one or more CSV files in order
pub struct CsvTradeSource {
    pending: VecDeque<PathBuf>,
    current: Option<(String, Rows)>,
    symbol: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    row_number: u64,
    skipped: u64,
}

impl CsvTradeSource {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            pending: files.into(),
            current: None,
            symbol: None,
            start: None,
            end: None,
            row_number: 0,
            skipped: 0,
        }
    }

    /// Read from an already-open CSV stream
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        let mut source = Self::new(Vec::new());
        source.current = Some(("<reader>".to_string(), rows_from(Box::new(reader))));
        source
    }

    /// Keep only rows for this raw symbol (skips spreads and other months)
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Keep only trades in `[start, end)`
    pub fn with_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    fn next_row(&mut self) -> Result<Option<CsvRow>> {
        loop {
            if let Some((label, rows)) = self.current.as_mut() {
                if let Some(row) = rows.next() {
                    self.row_number += 1;
                    let row = row.with_context(|| {
                        format!("Failed to parse CSV row {} of {}", self.row_number, label)
                    })?;
                    return Ok(Some(row));
                }
                debug!("Finished {} after {} rows", label, self.row_number);
                self.current = None;
            }

            let Some(path) = self.pending.pop_front() else {
                return Ok(None);
            };
            info!("Reading trades from {:?}", path);
            let reader = open_trade_file(&path)?;
            self.current = Some((path.display().to_string(), rows_from(reader)));
            self.row_number = 0;
        }
    }

    fn accepts(&self, row: &CsvRow) -> bool {
        // Only trade actions for the selected contract
        row.action == "T" && self.symbol.as_ref().map_or(true, |s| &row.symbol == s)
    }

    fn in_range(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && self.end.map_or(true, |end| ts < end)
    }
}

impl TradeSource for CsvTradeSource {
    async fn next_trade(&mut self) -> Result<Option<Trade>> {
        while let Some(row) = self.next_row()? {
            if !self.accepts(&row) {
                continue;
            }
            match trade_from_row(&row)? {
                Some(trade) if self.in_range(trade.ts_event) => return Ok(Some(trade)),
                Some(_) => {}
                None => self.skipped += 1,
            }
        }
        Ok(None)
    }

    fn skipped_records(&self) -> u64 {
        self.skipped
    }
}

fn rows_from(reader: Box<dyn Read>) -> Rows {
    csv::Reader::from_reader(reader).into_deserialize()
}

fn trade_from_row(row: &CsvRow) -> Result<Option<Trade>> {
    let side = match row.side.as_str() {
        "B" => Side::Buy,
        "A" => Side::Sell,
        "N" => return Ok(None),
        other => bail!("Malformed trade: unknown side {:?} at {}", other, row.ts_event),
    };
    if !(row.price.is_finite() && row.price > 0.0) {
        bail!("Malformed trade: price {} at {}", row.price, row.ts_event);
    }
    if row.size == 0 {
        bail!("Malformed trade: zero size at {}", row.ts_event);
    }

    Ok(Some(Trade {
        ts_event: parse_ts_event(&row.ts_event)?,
        price: row.price,
        size: row.size,
        side,
    }))
}

fn parse_ts_event(raw: &str) -> Result<DateTime<Utc>> {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let nanos: i64 = raw
            .parse()
            .with_context(|| format!("Failed to parse timestamp: {}", raw))?;
        return Ok(DateTime::from_timestamp_nanos(nanos));
    }
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Failed to parse timestamp: {}", raw))?
        .with_timezone(&Utc);
    Ok(ts)
}
