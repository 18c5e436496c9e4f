//! Inputs produce price data for exchanges. Exchanges bind their underlying data representation
//! to that used by the input. An input owns the full aligned history for a dataset and is loaded
//! once; exchanges hold a shared reference and read from it by row position.
pub mod selene;
