use std::fs::create_dir_all;
use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use time::Month;

/*
 * Binance kline format:
 * 1607444700000,          // Open time
 * "18879.99",             // Open
 * "18900.00",             // High
 * "18878.98",             // Low
 * "18896.13",             // Close (or latest price)
 * "492.363",              // Volume
 * 1607444759999,          // Close time
 * "9302145.66080",        // Quote asset volume
 * 1874,                   // Number of trades
 * "385.983",              // Taker buy volume
 * "7292402.33267",        // Taker buy quote asset volume
 * "0"                     // Ignore.
 */
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BinanceKline {
    pub open_date: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_date: i64,
}

/// Turns a `YYYY-MM` argument into a year/month pair.
pub fn parse_month(value: &str) -> Result<(i32, Month)> {
    let (year, month) = value
        .split_once('-')
        .ok_or_else(|| anyhow!("expected YYYY-MM, got {value}"))?;
    let year: i32 = year
        .parse()
        .with_context(|| format!("bad year in {value}"))?;
    let month: u8 = month
        .parse()
        .with_context(|| format!("bad month in {value}"))?;
    let month = Month::try_from(month).with_context(|| format!("bad month in {value}"))?;
    Ok((year, month))
}

fn months(start: (i32, Month), end: (i32, Month)) -> Vec<(i32, Month)> {
    let mut result = Vec::new();
    let (mut year, mut month) = start;
    while year < end.0 || (year == end.0 && u8::from(month) <= u8::from(end.1)) {
        result.push((year, month));
        if month == Month::December {
            year += 1;
        }
        month = month.next();
    }
    result
}

/// Get one month of daily candles for a symbol from the Binance public archive.
pub fn fetch_monthly_klines(symbol: &str, year: i32, month: Month) -> Result<Vec<BinanceKline>> {
    let url = format!(
        "https://data.binance.vision/data/spot/monthly/klines/{symbol}/1d/{symbol}-1d-{year}-{:02}.zip",
        u8::from(month)
    );
    info!("BINANCE: Fetching {url}");

    let resp = reqwest::blocking::get(&url)?
        .error_for_status()
        .with_context(|| format!("no archive at {url}"))?;
    let contents = resp.bytes()?;
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_all(&contents)?;

    let mut klines = Vec::new();
    let mut zip = zip::ZipArchive::new(cursor)?;
    for i in 0..zip.len() {
        let mut zip_file = zip.by_index(i)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(&mut zip_file);
        for row in reader.records() {
            let row = row?;
            //Newer archives carry a header row, skip anything that doesn't open with a timestamp
            let Some(first) = row.get(0) else { continue };
            let Ok(open_date) = first.parse::<i64>() else {
                continue;
            };
            if row.len() < 7 {
                bail!("short kline row in {url}");
            }

            klines.push(BinanceKline {
                open_date: open_date / 1000,
                open: row[1].parse()?,
                high: row[2].parse()?,
                low: row[3].parse()?,
                close: row[4].parse()?,
                volume: row[5].parse()?,
                close_date: row[6].parse::<i64>()? / 1000,
            });
        }
    }
    Ok(klines)
}

/// Get daily candles for a symbol across an inclusive month range, in date order.
pub fn fetch_klines(
    symbol: &str,
    start: (i32, Month),
    end: (i32, Month),
) -> Result<Vec<BinanceKline>> {
    let mut klines = Vec::new();
    for (year, month) in months(start, end) {
        klines.extend(fetch_monthly_klines(symbol, year, month)?);
    }
    Ok(klines)
}

/// Write candles into the per-asset csv format the input layer loads. The close time stamps the
/// row: the closing price belongs to the end of its period.
pub fn write_csv(klines: &[BinanceKline], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["date", "open", "high", "low", "close", "volume"])?;
    for kline in klines {
        writer.write_record(&[
            kline.close_date.to_string(),
            kline.open.to_string(),
            kline.high.to_string(),
            kline.low.to_string(),
            kline.close.to_string(),
            kline.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Fetch every symbol over the month range and write `<dir>/<symbol>.csv` for each.
pub fn download_daily_klines(
    dir: &Path,
    symbols: &[String],
    start: (i32, Month),
    end: (i32, Month),
) -> Result<()> {
    create_dir_all(dir)?;
    for symbol in symbols {
        let klines = fetch_klines(symbol, start, end)?;
        if klines.is_empty() {
            bail!("no data for {symbol} between {start:?} and {end:?}");
        }
        let path = dir.join(format!("{symbol}.csv"));
        write_csv(&klines, &path)?;
        info!("BINANCE: Wrote {} rows to {path:?}", klines.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use time::Month;

    use super::{months, parse_month};

    #[test]
    fn test_that_month_arguments_parse() {
        assert_eq!(parse_month("2022-08").unwrap(), (2022, Month::August));
        assert_eq!(parse_month("2023-1").unwrap(), (2023, Month::January));

        assert!(parse_month("202208").is_err());
        assert!(parse_month("2022-13").is_err());
        assert!(parse_month("next-month").is_err());
    }

    #[test]
    fn test_that_month_range_crosses_year_boundary() {
        let range = months((2022, Month::November), (2023, Month::February));
        assert_eq!(
            range,
            vec![
                (2022, Month::November),
                (2022, Month::December),
                (2023, Month::January),
                (2023, Month::February),
            ]
        );
    }

    #[test]
    fn test_that_single_month_range_has_one_entry() {
        let range = months((2022, Month::August), (2022, Month::August));
        assert_eq!(range, vec![(2022, Month::August)]);
    }

    #[test]
    fn test_that_inverted_range_is_empty() {
        assert!(months((2023, Month::March), (2022, Month::August)).is_empty());
    }
}
