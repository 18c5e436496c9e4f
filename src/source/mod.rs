//! Sources are external data sources that are used to create inputs. Each source has its own
//! internal format that is converted into the input's csv format on disk, so the core never
//! touches the network: a source runs once, writes per-asset files, and the input layer loads
//! those.
pub mod binance;
