use chrono::Utc;
use serde::Serialize;
use std::fmt;

use crate::api::BinanceClient;
use crate::models::Trade;
use crate::Result;

/// Default lookback window for the activity summary.
pub const DEFAULT_WINDOW_SECS: u64 = 180;
/// Newest-first fetch size; the exchange caps a single request at 1000.
const FETCH_LIMIT: u32 = 1000;
/// Volume share beyond which one side dominates the window.
const DOMINANCE_PCT: f64 = 55.0;

/// Direction of recent taker flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityTrend {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for ActivityTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActivityTrend::Bullish => "Bullish",
            ActivityTrend::Bearish => "Bearish",
            ActivityTrend::Neutral => "Neutral",
        };
        f.write_str(label)
    }
}

/// Buy/sell breakdown of a recent trade window.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSummary {
    pub symbol: String,
    pub window_secs: u64,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_percentage: f64,
    pub sell_percentage: f64,
    pub average_trade_size: f64,
    pub trend: ActivityTrend,
    pub exchange_link: String,
}

/// Summarizes recent taker flow for a symbol on demand.
///
/// Independent of the poller: every call fetches a fresh trade batch from
/// the feed and reduces it to per-side volumes and a dominance label.
#[derive(Clone)]
pub struct TradeActivityAnalyzer {
    feed: BinanceClient,
    window_secs: u64,
}

impl TradeActivityAnalyzer {
    pub fn new(feed: BinanceClient, window_secs: u64) -> Self {
        Self { feed, window_secs }
    }

    /// Fetch and summarize the most recent trades for `symbol`.
    ///
    /// An empty window is a valid, all-zero summary; only transport
    /// failures and unknown symbols surface as errors.
    pub async fn analyze(&self, symbol: &str) -> Result<TradeSummary> {
        let trades = self.feed.recent_trades(symbol, FETCH_LIMIT).await?;
        let now_ms = Utc::now().timestamp_millis();
        Ok(summarize(symbol, &trades, now_ms, self.window_secs))
    }
}

/// Reduce an already-fetched trade batch to a window summary.
///
/// `is_buyer_maker` marks the passive buyer, so those trades count as
/// sells; the rest are taker buys.
pub fn summarize(symbol: &str, trades: &[Trade], now_ms: i64, window_secs: u64) -> TradeSummary {
    let cutoff = now_ms - window_secs as i64 * 1000;
    let recent: Vec<&Trade> = trades.iter().filter(|t| t.time >= cutoff).collect();
    let total_trades = recent.len();

    let (sells, buys): (Vec<&Trade>, Vec<&Trade>) =
        recent.into_iter().partition(|t| t.is_buyer_maker);

    let buy_volume: f64 = buys.iter().map(|t| t.qty).sum();
    let sell_volume: f64 = sells.iter().map(|t| t.qty).sum();
    let total_volume = buy_volume + sell_volume;

    let (buy_percentage, sell_percentage) = if total_volume > 0.0 {
        (
            buy_volume / total_volume * 100.0,
            sell_volume / total_volume * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let average_trade_size = if total_trades > 0 {
        total_volume / total_trades as f64
    } else {
        0.0
    };

    let trend = if buy_percentage > DOMINANCE_PCT {
        ActivityTrend::Bullish
    } else if sell_percentage > DOMINANCE_PCT {
        ActivityTrend::Bearish
    } else {
        ActivityTrend::Neutral
    };

    TradeSummary {
        symbol: symbol.to_string(),
        window_secs,
        total_trades,
        buy_trades: buys.len(),
        sell_trades: sells.len(),
        buy_volume: round_to(buy_volume, 4),
        sell_volume: round_to(sell_volume, 4),
        buy_percentage: round_to(buy_percentage, 2),
        sell_percentage: round_to(sell_percentage, 2),
        average_trade_size: round_to(average_trade_size, 4),
        trend,
        exchange_link: exchange_link(symbol),
    }
}

fn exchange_link(symbol: &str) -> String {
    format!(
        "https://www.binance.com/en/trade/{}",
        symbol.replace("USDT", "_USDT")
    )
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
