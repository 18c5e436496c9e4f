//! # What is Cabomba?
//!
//! Cabomba simulates trading on a currency exchange against historical price data. Users hold a
//! balance across several assets and a base cash currency, execute buy/sell orders at each time
//! step's closing price, advance through the price history one step at a time and query derived
//! metrics such as capital and portfolio weights. The intended use is backtesting trading
//! strategies in Rust without touching a live venue.
//!
//! # Implementation
//!
//! A simulation is composed of:
//! - An input, [Selene](crate::input::selene::Selene) is the implementation. The input loads the
//!   aligned per-asset price history once, from a directory of csv files or built in memory, and
//!   defines the candle format exchanges read.
//! - An exchange, [Barra](crate::exchange::barra_v1::BarraV1) is the implementation. An exchange
//!   value is an immutable snapshot of balances plus a position into the shared input; trading
//!   and stepping operations return new snapshots rather than mutating, so past states stay
//!   valid and strategies can branch from any point in a run.
//!
//! In addition to this, there are data sources which call some external source and write the csv
//! files the input loads: the [binance](crate::source::binance) source fetches daily candles from
//! the Binance public archive, and the `fetch_data` binary wraps it:
//!
//! ``
//! cargo run --bin fetch_data [dir] [start YYYY-MM] [end YYYY-MM] [symbol]...
//! ``
//!
//! There is deliberately no order book and no matching engine here: orders fill instantly at the
//! current close with a flat percentage fee, which is the right level of detail for strategies
//! that trade on candles rather than microstructure.
pub mod exchange;
pub mod input;
pub mod source;
