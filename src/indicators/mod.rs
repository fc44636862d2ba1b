//! Moving averages over the retained price-sample window.

/// Sample counts for the short, mid and long moving averages.
pub const MA_SHORT: usize = 7;
pub const MA_MID: usize = 25;
pub const MA_LONG: usize = 99;

/// Mean of the most recent `period` prices, newest first.
///
/// A shorter history averages whatever exists; no samples yields 0.0 so the
/// trend classifier can treat the symbol as not-yet-warmed-up.
pub fn recent_average(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() || period == 0 {
        return 0.0;
    }
    let take = period.min(prices.len());
    let sum: f64 = prices.iter().take(take).sum();
    sum / take as f64
}

/// The (ma7, ma25, ma99) stack over a newest-first price slice.
pub fn moving_averages(prices: &[f64]) -> (f64, f64, f64) {
    (
        recent_average(prices, MA_SHORT),
        recent_average(prices, MA_MID),
        recent_average(prices, MA_LONG),
    )
}
