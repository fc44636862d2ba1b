// Per-tick analysis: cycle history rolling, trend labels, trade flow.

pub mod cycle;
pub mod trades;
pub mod trend;

pub use cycle::{seed_slot, symbol_seed, CycleEngine, CycleShift, CycleTrigger};
pub use trades::{ActivityTrend, TradeActivityAnalyzer, TradeSummary};
pub use trend::classify;
