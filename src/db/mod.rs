pub mod store;

pub use store::{CoinStore, TickWrite, SAMPLE_RETENTION};
