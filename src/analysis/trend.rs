use crate::models::Trend;

/// MA7/MA25 separation (in percent) below which the averages are treated as
/// crossing rather than trending.
const CROSSOVER_PCT: f64 = 0.5;
/// Price-to-MA25 proximity band that signals an exit.
const EXIT_BAND: f64 = 0.01;

/// Classify a price against its moving-average stack.
///
/// Returns the trend plus a cycle-status line for the UI. The exit-position
/// message is checked after the crossover message and wins when both match;
/// MA99 acts as a macro filter that only annotates counter-trend readings.
pub fn classify(price: f64, ma7: f64, ma25: f64, ma99: f64) -> (Trend, String) {
    // Not enough samples for a meaningful read.
    if ma7 == 0.0 || ma25 == 0.0 {
        return (Trend::Neutral, "Consolidation".to_string());
    }

    let diff_pct = (ma7 - ma25).abs() / ma25 * 100.0;

    let (trend, mut status) = if price > ma7 && ma7 > ma25 {
        let mut status = "UP Cycle – bullish momentum".to_string();
        if diff_pct < CROSSOVER_PCT {
            status = "Begin Up Cycle – Possible Buy Zone".to_string();
        }
        if price <= ma25 * (1.0 + EXIT_BAND) {
            status = "Exit Long Position".to_string();
        }
        (Trend::Up, status)
    } else if price < ma7 && ma7 < ma25 {
        let mut status = "DOWN Cycle – bearish momentum".to_string();
        if diff_pct < CROSSOVER_PCT {
            status = "Begin Down Cycle – Possible Sell Zone".to_string();
        }
        if price >= ma25 * (1.0 - EXIT_BAND) {
            status = "Exit Short Position".to_string();
        }
        (Trend::Down, status)
    } else {
        (Trend::Neutral, "Consolidation".to_string())
    };

    if ma99 > 0.0 {
        if price > ma99 && trend == Trend::Down {
            status.push_str(" (Above MA99: Prioritize long trades)");
        } else if price < ma99 && trend == Trend::Up {
            status.push_str(" (Below MA99: Prioritize short trades)");
        }
    }

    (trend, status)
}
