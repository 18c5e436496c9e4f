use std::collections::HashMap;
use std::fs::read_dir;
use std::path::Path;

use derive_more::{Display, Error};
use log::info;
use rand::thread_rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::source::binance::fetch_klines;

/// A single period of price history for one asset. Only `close` is mandatory in source files;
/// the other columns are carried when present but are not used for trade valuation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SeleneCandle {
    pub date: i64,
    pub close: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
}

impl SeleneCandle {
    pub fn from_close(close: f64, date: i64) -> Self {
        Self {
            date,
            close,
            open: None,
            high: None,
            low: None,
            volume: None,
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum DataError {
    #[display("misaligned price series: {reason}")]
    Alignment { reason: String },
    #[display("{file}: missing mandatory close column")]
    MissingClose { file: String },
    #[display("{file}: could not parse {column} on row {row}")]
    Parse {
        file: String,
        column: String,
        row: usize,
    },
    #[display("io error: {source}")]
    Io { source: std::io::Error },
    #[display("csv error: {source}")]
    Csv { source: csv::Error },
}

impl From<std::io::Error> for DataError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<csv::Error> for DataError {
    fn from(source: csv::Error) -> Self {
        Self::Csv { source }
    }
}

// Selene produces data for exchanges to use. Series are stored per-symbol in row order with a
// single shared timeline: row i of every series was observed at dates[i]. Construction verifies
// this alignment so readers can index by position without further checks.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Selene {
    dates: Vec<i64>,
    inner: HashMap<String, Vec<SeleneCandle>>,
}

impl Selene {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn get_date(&self, pos: usize) -> Option<&i64> {
        self.dates.get(pos)
    }

    pub fn has_next(&self, pos: usize) -> bool {
        pos + 1 < self.dates.len()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn has_series(&self, symbol: &str) -> bool {
        self.inner.contains_key(symbol)
    }

    pub fn get_candle(&self, pos: usize, symbol: &str) -> Option<&SeleneCandle> {
        self.inner.get(symbol)?.get(pos)
    }

    pub fn get_close(&self, pos: usize, symbol: &str) -> Option<f64> {
        Some(self.get_candle(pos, symbol)?.close)
    }

    pub fn get_candles(&self, pos: usize) -> Option<HashMap<String, SeleneCandle>> {
        if pos >= self.dates.len() {
            return None;
        }
        let mut row = HashMap::new();
        for (symbol, series) in &self.inner {
            row.insert(symbol.clone(), series[pos].clone());
        }
        Some(row)
    }

    /// Build from per-symbol series that have already been assembled in row order. This is the
    /// single place where the alignment invariant is enforced.
    pub fn from_series(inner: HashMap<String, Vec<SeleneCandle>>) -> Result<Self, DataError> {
        if inner.is_empty() {
            return Err(DataError::Alignment {
                reason: "no price series".to_string(),
            });
        }

        let mut symbols: Vec<&String> = inner.keys().collect();
        symbols.sort();

        let first_symbol = symbols[0];
        let timeline: Vec<i64> = inner[first_symbol].iter().map(|c| c.date).collect();
        if timeline.is_empty() {
            return Err(DataError::Alignment {
                reason: format!("{first_symbol} has no rows"),
            });
        }
        if !timeline.windows(2).all(|w| w[0] < w[1]) {
            return Err(DataError::Alignment {
                reason: format!("{first_symbol} timestamps are not strictly increasing"),
            });
        }

        for symbol in &symbols[1..] {
            let series = &inner[*symbol];
            if series.len() != timeline.len() {
                return Err(DataError::Alignment {
                    reason: format!(
                        "{symbol} has {} rows, {first_symbol} has {}",
                        series.len(),
                        timeline.len()
                    ),
                });
            }
            for (row, candle) in series.iter().enumerate() {
                if candle.date != timeline[row] {
                    return Err(DataError::Alignment {
                        reason: format!(
                            "{symbol} row {row} has timestamp {}, {first_symbol} has {}",
                            candle.date, timeline[row]
                        ),
                    });
                }
            }
        }

        Ok(Self {
            dates: timeline,
            inner,
        })
    }

    /// One-time load of every `.csv` file in a directory. The file stem is the asset symbol. No
    /// further I/O happens after this returns.
    pub fn from_dir(path: &Path) -> Result<Self, DataError> {
        let mut inner = HashMap::new();
        for entry in read_dir(path)? {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(symbol) = file.file_stem().and_then(|s| s.to_str()) {
                info!("SELENE: Loading series for {symbol} from {file:?}");
                inner.insert(symbol.to_string(), read_csv_series(&file)?);
            }
        }
        Self::from_series(inner)
    }

    /// Builds a table straight from the Binance public archive, one candle per day over an
    /// inclusive month range. Network runs once, here; the table is read-only afterwards.
    pub fn from_binance(
        symbols: Vec<&str>,
        start: (i32, time::Month),
        end: (i32, time::Month),
    ) -> anyhow::Result<Self> {
        let mut builder = SeleneBuilder::new();
        for symbol in symbols {
            for kline in fetch_klines(symbol, start, end)? {
                builder.add_candle(
                    SeleneCandle {
                        date: kline.close_date,
                        close: kline.close,
                        open: Some(kline.open),
                        high: Some(kline.high),
                        low: Some(kline.low),
                        volume: Some(kline.volume),
                    },
                    symbol,
                );
            }
        }
        Ok(builder.build()?)
    }

    /// Generates random [Selene] for use in tests that don't depend on prices.
    pub fn random(length: i64, symbols: Vec<&str>) -> Self {
        let price_dist = Uniform::new(90.0, 100.0);
        let mut rng = thread_rng();

        let mut inner = HashMap::new();
        for symbol in symbols {
            let mut series = Vec::new();
            for date in 100..length + 100 {
                series.push(SeleneCandle::from_close(price_dist.sample(&mut rng), date));
            }
            inner.insert(symbol.to_string(), series);
        }
        Self::from_series(inner).unwrap()
    }
}

/// Parse one per-asset file. The header is discovered at read time: `close` is mandatory, the
/// recognised optional columns are picked up when present, anything else is ignored. When there
/// is no `date` column the row position is the implicit timestamp.
fn read_csv_series(path: &Path) -> Result<Vec<SeleneCandle>, DataError> {
    let file = path.to_string_lossy().to_string();
    let mut reader = csv::Reader::from_path(path)?;

    let mut columns: HashMap<String, usize> = HashMap::new();
    for (idx, name) in reader.headers()?.iter().enumerate() {
        columns.insert(name.trim().to_lowercase(), idx);
    }
    let close_col = *columns
        .get("close")
        .ok_or_else(|| DataError::MissingClose { file: file.clone() })?;

    let parse_f64 = |field: &str, column: &str, row: usize| -> Result<f64, DataError> {
        field.trim().parse::<f64>().map_err(|_| DataError::Parse {
            file: file.clone(),
            column: column.to_string(),
            row,
        })
    };
    let optional = |record: &csv::StringRecord, column: &str, row: usize| {
        columns
            .get(column)
            .and_then(|idx| record.get(*idx))
            .map(|field| parse_f64(field, column, row))
            .transpose()
    };

    let mut series = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let close = parse_f64(record.get(close_col).unwrap_or(""), "close", row)?;
        let date = match columns.get("date").and_then(|idx| record.get(*idx)) {
            Some(field) => field.trim().parse::<i64>().map_err(|_| DataError::Parse {
                file: file.clone(),
                column: "date".to_string(),
                row,
            })?,
            None => row as i64,
        };
        series.push(SeleneCandle {
            date,
            close,
            open: optional(&record, "open", row)?,
            high: optional(&record, "high", row)?,
            low: optional(&record, "low", row)?,
            volume: optional(&record, "volume", row)?,
        });
    }
    Ok(series)
}

pub struct SeleneBuilder {
    inner: HashMap<String, Vec<SeleneCandle>>,
}

impl SeleneBuilder {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn add_candle(&mut self, candle: SeleneCandle, symbol: impl Into<String>) {
        self.inner.entry(symbol.into()).or_default().push(candle);
    }

    pub fn add_close(&mut self, close: f64, date: i64, symbol: impl Into<String>) {
        self.add_candle(SeleneCandle::from_close(close, date), symbol);
    }

    pub fn build(&mut self) -> Result<Selene, DataError> {
        Selene::from_series(std::mem::take(&mut self.inner))
    }
}

impl Default for SeleneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{DataError, Selene, SeleneBuilder};

    #[test]
    fn test_that_aligned_series_build() {
        let mut builder = SeleneBuilder::new();
        builder.add_close(101.00, 100, "ABC");
        builder.add_close(10.00, 100, "BCD");
        builder.add_close(102.00, 101, "ABC");
        builder.add_close(11.00, 101, "BCD");

        let selene = builder.build().unwrap();
        assert_eq!(selene.len(), 2);
        assert_eq!(selene.get_close(0, "ABC").unwrap(), 101.00);
        assert_eq!(selene.get_close(1, "BCD").unwrap(), 11.00);
        assert_eq!(*selene.get_date(1).unwrap(), 101);
    }

    #[test]
    fn test_that_length_mismatch_fails() {
        let mut builder = SeleneBuilder::new();
        builder.add_close(101.00, 100, "ABC");
        builder.add_close(102.00, 101, "ABC");
        builder.add_close(10.00, 100, "BCD");

        assert!(matches!(
            builder.build(),
            Err(DataError::Alignment { .. })
        ));
    }

    #[test]
    fn test_that_timestamp_mismatch_fails() {
        let mut builder = SeleneBuilder::new();
        builder.add_close(101.00, 100, "ABC");
        builder.add_close(102.00, 101, "ABC");
        builder.add_close(10.00, 100, "BCD");
        builder.add_close(11.00, 102, "BCD");

        assert!(matches!(
            builder.build(),
            Err(DataError::Alignment { .. })
        ));
    }

    #[test]
    fn test_that_unsorted_timestamps_fail() {
        let mut builder = SeleneBuilder::new();
        builder.add_close(101.00, 101, "ABC");
        builder.add_close(102.00, 100, "ABC");

        assert!(matches!(
            builder.build(),
            Err(DataError::Alignment { .. })
        ));
    }

    #[test]
    fn test_that_empty_build_fails() {
        assert!(matches!(
            SeleneBuilder::new().build(),
            Err(DataError::Alignment { .. })
        ));
    }

    #[test]
    fn test_that_candle_row_returns_every_symbol() {
        let selene = Selene::random(10, vec!["ABC", "BCD"]);
        let row = selene.get_candles(3).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("ABC").unwrap().date, 103);
    }

    #[test]
    fn test_that_position_past_end_returns_nothing() {
        let selene = Selene::random(10, vec!["ABC"]);
        assert!(selene.get_candles(10).is_none());
        assert!(selene.get_close(10, "ABC").is_none());
        assert!(!selene.has_next(9));
        assert!(selene.has_next(8));
    }
}
