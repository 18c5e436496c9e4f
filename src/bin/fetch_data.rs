use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};

use cabomba::source::binance::{download_daily_klines, parse_month};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        bail!("usage: fetch_data [dir] [start YYYY-MM] [end YYYY-MM] [symbol]...");
    }

    let dir = PathBuf::from(&args[1]);
    let start = parse_month(&args[2])?;
    let end = parse_month(&args[3])?;
    let symbols = args[4..].to_vec();

    download_daily_klines(&dir, &symbols, start, end)
}
