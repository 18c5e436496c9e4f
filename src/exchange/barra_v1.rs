use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use derive_more::{Display, Error};
use log::info;
use serde::{Deserialize, Serialize};

use crate::input::selene::{Selene, SeleneCandle};

/// Symbol of the base currency. Always present in a balance, is the unit of account for order
/// values, fees and capital, and has no price series of its own.
pub const CASH: &str = "cash";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Trade {
    pub symbol: String,
    pub value: f64,
    pub quantity: f64,
    pub date: i64,
    pub typ: TradeType,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        value: f64,
        quantity: f64,
        date: i64,
        typ: TradeType,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            value,
            quantity,
            date,
            typ,
        }
    }
}

/// Amount held of each symbol, cash included. Amounts are never negative.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Balance(pub HashMap<String, f64>);

impl Balance {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// The usual starting point: some cash and nothing else. Asset entries are filled in with
    /// zero when the balance is bound to a price table.
    pub fn with_cash(amount: f64) -> Self {
        let mut inner = HashMap::new();
        inner.insert(CASH.to_string(), amount);
        Self(inner)
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.get(symbol).copied()
    }

    pub fn insert(&mut self, symbol: &str, amount: f64) {
        self.0.insert(symbol.to_string(), amount);
    }

    pub fn cash(&self) -> f64 {
        self.get(CASH).unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Display, Error, PartialEq)]
pub enum BarraError {
    #[display("unknown asset: {symbol}")]
    UnknownAsset { symbol: String },
    #[display("insufficient {symbol} balance: required {required}, available {available}")]
    InsufficientBalance {
        symbol: String,
        required: f64,
        available: f64,
    },
    #[display("order value {value} below minimum order size {min_order_size}")]
    OrderTooSmall { value: f64, min_order_size: f64 },
    #[display("end of price data")]
    EndOfData,
    #[display("portfolio is undefined when capital is zero")]
    UndefinedPortfolio,
    #[display("invalid order: {reason}")]
    InvalidOrder { reason: String },
    #[display("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Simulates trading on a currency exchange against historical closing prices.
///
/// A value of this type is an immutable snapshot: balance, fee rate, minimum order size and a
/// position into a shared [Selene] price table. `buy`, `sell` and `next_step` return a new
/// snapshot and never touch the receiver, so callers can keep any number of past states around
/// and branch from them freely. The price table is shared behind an [Arc] rather than copied
/// into each snapshot.
#[derive(Clone, Debug)]
pub struct BarraV1 {
    balance: Balance,
    fee: f64,
    min_order_size: f64,
    pos: usize,
    source: Arc<Selene>,
    trade_log: Vec<Trade>,
}

impl BarraV1 {
    /// Binds a starting balance to a loaded price table at the first row. Every non-cash balance
    /// key must have a series in the table; symbols the table knows but the balance doesn't are
    /// seeded with a zero holding.
    pub fn new(
        source: Arc<Selene>,
        balance: Balance,
        fee: f64,
        min_order_size: f64,
    ) -> Result<Self, BarraError> {
        if !(0.0..1.0).contains(&fee) {
            return Err(BarraError::InvalidConfig {
                reason: format!("fee {fee} must be in [0, 1)"),
            });
        }
        if !min_order_size.is_finite() || min_order_size < 0.0 {
            return Err(BarraError::InvalidConfig {
                reason: format!("minimum order size {min_order_size} must be non-negative"),
            });
        }
        if source.is_empty() {
            return Err(BarraError::InvalidConfig {
                reason: "price table has no rows".to_string(),
            });
        }
        for (symbol, amount) in balance.0.iter() {
            if !amount.is_finite() || *amount < 0.0 {
                return Err(BarraError::InvalidConfig {
                    reason: format!("balance of {amount} {symbol} must be non-negative"),
                });
            }
            if symbol != CASH && !source.has_series(symbol) {
                return Err(BarraError::UnknownAsset {
                    symbol: symbol.clone(),
                });
            }
        }

        let mut balance = balance;
        balance.0.entry(CASH.to_string()).or_insert(0.0);
        for symbol in source.symbols() {
            balance.0.entry(symbol).or_insert(0.0);
        }

        Ok(Self {
            balance,
            fee,
            min_order_size,
            pos: 0,
            source,
            trade_log: Vec::new(),
        })
    }

    /// One-time load of a directory of per-asset csv files followed by [BarraV1::new]. No I/O
    /// happens after construction.
    pub fn from_dir(
        path: &Path,
        balance: Balance,
        fee: f64,
        min_order_size: f64,
    ) -> anyhow::Result<Self> {
        let source = Selene::from_dir(path)?;
        Ok(Self::new(Arc::new(source), balance, fee, min_order_size)?)
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn cash(&self) -> f64 {
        self.balance.cash()
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn min_order_size(&self) -> f64 {
        self.min_order_size
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn now(&self) -> i64 {
        //Cannot fail: construction rejects an empty table and next_step refuses to move past the
        //last row, so pos always points at a row
        *self.source.get_date(self.pos).unwrap()
    }

    pub fn has_next(&self) -> bool {
        self.source.has_next(self.pos)
    }

    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }

    /// The candle row at the current position for every asset in the table.
    pub fn fetch_candles(&self) -> HashMap<String, SeleneCandle> {
        self.source.get_candles(self.pos).unwrap_or_default()
    }

    fn tradeable_close(&self, symbol: &str, quantity: f64) -> Result<f64, BarraError> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(BarraError::InvalidOrder {
                reason: format!("quantity {quantity} must be positive"),
            });
        }
        //Cash has no price series so trading it fails here like any other unknown symbol
        self.source
            .get_close(self.pos, symbol)
            .ok_or_else(|| BarraError::UnknownAsset {
                symbol: symbol.to_string(),
            })
    }

    /// Buys `quantity` of `symbol` at the current closing price. The fee is charged in cash on
    /// top of the order value; the minimum order size is compared against the order value before
    /// the fee.
    pub fn buy(&self, symbol: &str, quantity: f64) -> Result<Self, BarraError> {
        let close = self.tradeable_close(symbol, quantity)?;
        let value = close * quantity;
        if value < self.min_order_size {
            return Err(BarraError::OrderTooSmall {
                value,
                min_order_size: self.min_order_size,
            });
        }

        let cost = value * (1.0 + self.fee);
        let cash = self.balance.cash();
        if cost > cash {
            return Err(BarraError::InsufficientBalance {
                symbol: CASH.to_string(),
                required: cost,
                available: cash,
            });
        }

        let held = self.balance.get(symbol).unwrap_or_default();
        let mut next = self.clone();
        next.balance.insert(CASH, cash - cost);
        next.balance.insert(symbol, held + quantity);
        next.trade_log
            .push(Trade::new(symbol, value, quantity, self.now(), TradeType::Buy));
        info!(
            "EXCHANGE: Bought {quantity} {symbol} at {close}, cash balance {}",
            cash - cost
        );
        Ok(next)
    }

    /// Sells `quantity` of `symbol` at the current closing price. Proceeds land in cash net of
    /// the fee.
    pub fn sell(&self, symbol: &str, quantity: f64) -> Result<Self, BarraError> {
        let close = self.tradeable_close(symbol, quantity)?;
        let value = close * quantity;
        if value < self.min_order_size {
            return Err(BarraError::OrderTooSmall {
                value,
                min_order_size: self.min_order_size,
            });
        }

        let held = self.balance.get(symbol).unwrap_or_default();
        if quantity > held {
            return Err(BarraError::InsufficientBalance {
                symbol: symbol.to_string(),
                required: quantity,
                available: held,
            });
        }

        let proceeds = value * (1.0 - self.fee);
        let cash = self.balance.cash();
        let mut next = self.clone();
        next.balance.insert(CASH, cash + proceeds);
        next.balance.insert(symbol, held - quantity);
        next.trade_log
            .push(Trade::new(symbol, value, quantity, self.now(), TradeType::Sell));
        info!(
            "EXCHANGE: Sold {quantity} {symbol} at {close}, cash balance {}",
            cash + proceeds
        );
        Ok(next)
    }

    /// Moves to the next price row. Balances are untouched, only the prices that subsequent
    /// trades and valuations see change.
    pub fn next_step(&self) -> Result<Self, BarraError> {
        if !self.source.has_next(self.pos) {
            return Err(BarraError::EndOfData);
        }
        let mut next = self.clone();
        next.pos += 1;
        info!("EXCHANGE: Advanced to {}", next.now());
        Ok(next)
    }

    /// Total wealth in cash units at the current prices: cash plus every holding valued at its
    /// closing price.
    pub fn capital(&self) -> f64 {
        let mut capital = 0.0;
        for (symbol, amount) in self.balance.0.iter() {
            if symbol == CASH {
                capital += amount;
            } else if let Some(close) = self.source.get_close(self.pos, symbol) {
                capital += amount * close;
            }
        }
        capital
    }

    /// Fractional share of capital held in each symbol, cash included. Shares sum to one.
    pub fn portfolio(&self) -> Result<HashMap<String, f64>, BarraError> {
        let capital = self.capital();
        if capital <= 0.0 {
            return Err(BarraError::UndefinedPortfolio);
        }

        let mut portfolio = HashMap::new();
        for (symbol, amount) in self.balance.0.iter() {
            let value = if symbol == CASH {
                *amount
            } else {
                self.source.get_close(self.pos, symbol).unwrap_or_default() * amount
            };
            portfolio.insert(symbol.clone(), value / capital);
        }
        Ok(portfolio)
    }

    /// Trades toward target fractional weights (cash key included) in one call.
    ///
    /// Sells always run before buys so that released cash funds the purchases. The post-fee
    /// portfolio volume is solved by fixed-point iteration first, otherwise the buys would be
    /// sized for cash the fees have already consumed. Diffs whose order value falls below the
    /// minimum order size are skipped rather than fatal: a fractional target routinely produces
    /// dust-sized corrections.
    pub fn rebalance(&self, target: &HashMap<String, f64>) -> Result<Self, BarraError> {
        let mut weight_sum = 0.0;
        for (symbol, weight) in target {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(BarraError::InvalidOrder {
                    reason: format!("target weight {weight} for {symbol} must be non-negative"),
                });
            }
            if symbol != CASH && !self.source.has_series(symbol) {
                return Err(BarraError::UnknownAsset {
                    symbol: symbol.clone(),
                });
            }
            weight_sum += weight;
        }
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(BarraError::InvalidOrder {
                reason: format!("target weights sum to {weight_sum}, expected 1"),
            });
        }

        let volume = self.capital();
        let current = self.portfolio()?;
        let target_weight = |symbol: &str| target.get(symbol).copied().unwrap_or(0.0);

        info!("EXCHANGE: Rebalancing toward target weights {target:?}");

        //How much of the portfolio volume survives the round of trading, given that every sell
        //and buy leaks fee. Converges in a handful of iterations.
        let fee = self.fee;
        let mut pvc0 = 1.0;
        let mut pvc1 = 1.0 - 2.0 * fee + fee * fee;
        while (pvc1 - pvc0).abs() > 1e-10 {
            pvc0 = pvc1;
            let mut oversold = 0.0;
            for (symbol, weight) in current.iter() {
                if symbol != CASH {
                    oversold += (weight - pvc1 * target_weight(symbol)).max(0.0);
                }
            }
            pvc1 = (1.0 - fee * current.get(CASH).copied().unwrap_or_default()
                - (2.0 * fee - fee * fee) * oversold)
                / (1.0 - fee * target_weight(CASH));
        }
        let target_volume = volume * pvc1;

        let mut next = self.clone();
        let mut buys: Vec<(String, f64)> = Vec::new();
        for symbol in self.source.symbols() {
            let held = self.balance.get(&symbol).unwrap_or_default();
            //Symbols come from the table so the close always exists
            let close = self.source.get_close(self.pos, &symbol).unwrap_or_default();
            if close <= 0.0 {
                continue;
            }
            let wanted = target_volume * target_weight(&symbol) / close;
            if wanted < held {
                match next.sell(&symbol, held - wanted) {
                    Ok(sold) => next = sold,
                    Err(BarraError::OrderTooSmall { .. }) => {}
                    Err(err) => return Err(err),
                }
            } else if wanted > held {
                buys.push((symbol, wanted - held));
            }
        }
        for (symbol, quantity) in buys {
            match next.buy(&symbol, quantity) {
                Ok(bought) => next = bought,
                Err(BarraError::OrderTooSmall { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(next)
    }
}

/// Generates random [Barra](BarraV1) for use in tests that don't depend on prices.
pub fn random_barra_generator(length: i64) -> BarraV1 {
    let source = Selene::random(length, vec!["ABC", "BCD"]);
    BarraV1::new(
        Arc::new(source),
        Balance::with_cash(1_000_000.0),
        0.001,
        1.0,
    )
    .unwrap()
}
