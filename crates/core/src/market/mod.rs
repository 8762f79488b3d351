pub mod entity;
pub mod port;

pub use entity::{Candle, Chart, Detail, MarketScan, Quote, SymbolError, Tick};
pub use port::{normalize_candles, ChartClient, DetailClient, QuoteClient, RawCandle, TradeStreamClient};
