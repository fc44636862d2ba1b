use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use crate::models::{CycleHistory, CycleSlot};

/// Absolute tolerance when deciding two slots hold the same cycle.
pub const STAGNANT_EPSILON: f64 = 1e-4;
/// Relative distance under which a fresh cycle is too close to history.
const SIMILARITY_PCT: f64 = 0.05;
/// Price must rise this far past the stored high to force a new cycle.
const SIGNIFICANT_INCREASE: f64 = 1.05;
/// Fallback low when the mirrored low lands at or above the high.
const LOW_CLAMP: f64 = 0.85;

/// Why a cycle rolled. When several conditions hold at once the strongest
/// one wins: completed > significant increase > stagnant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// First observation for a symbol with no history yet.
    Bootstrap,
    /// Price retraced past the completion threshold from the stored high.
    Completed,
    /// Price broke more than 5% above the stored high.
    SignificantIncrease,
    /// The retained history collapsed into near-identical slots.
    Stagnant,
}

impl fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CycleTrigger::Bootstrap => "history initialized",
            CycleTrigger::Completed => "cycle completed",
            CycleTrigger::SignificantIncrease => "significant price increase",
            CycleTrigger::Stagnant => "stagnant history refresh",
        };
        f.write_str(reason)
    }
}

/// Result of a history roll: the trigger, the shifted history and the slot
/// that entered position 1.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleShift {
    pub trigger: CycleTrigger,
    pub history: CycleHistory,
    pub new_slot: CycleSlot,
}

/// Decides, per price tick, whether the rolling cycle history moves forward
/// and what synthetic values enter slot 1.
///
/// The injected values are deliberately not the raw observed extrema: each
/// new cycle gets a seeded spread so consecutive cycles stay visually
/// distinct, with a mirrored low and an anti-collision re-roll when the
/// result lands too close to an existing slot.
#[derive(Debug, Clone)]
pub struct CycleEngine {
    cycle_end_percent: f64,
}

impl Default for CycleEngine {
    fn default() -> Self {
        Self::new(2.0)
    }
}

impl CycleEngine {
    /// `cycle_end_percent` is the retracement from the stored high that
    /// marks a cycle as complete.
    pub fn new(cycle_end_percent: f64) -> Self {
        Self { cycle_end_percent }
    }

    /// Evaluate one tick. Returns the shifted history when a roll fired,
    /// `None` when the stored history must stay untouched.
    ///
    /// `stored_high` is the all-time high currently persisted for the
    /// symbol; `observed_high`/`observed_low` are the extrema after widening
    /// with the latest price. The caller owns seed derivation so tests can
    /// pin the synthetic variation exactly.
    pub fn evaluate(
        &self,
        history: &CycleHistory,
        stored_high: f64,
        observed_high: f64,
        observed_low: f64,
        latest_price: f64,
        seed: u64,
    ) -> Option<CycleShift> {
        // No history yet: the first cycle takes the raw extrema.
        if history.newest().is_empty() {
            let slot = CycleSlot::new(observed_high, observed_low);
            let mut next = *history;
            next.set_newest(slot);
            return Some(CycleShift {
                trigger: CycleTrigger::Bootstrap,
                history: next,
                new_slot: slot,
            });
        }

        let completed = latest_price < stored_high * (1.0 - self.cycle_end_percent / 100.0);
        let significant = latest_price > stored_high * SIGNIFICANT_INCREASE;
        let stagnant = history.is_stagnant(STAGNANT_EPSILON);

        let trigger = if completed {
            CycleTrigger::Completed
        } else if significant {
            CycleTrigger::SignificantIncrease
        } else if stagnant {
            CycleTrigger::Stagnant
        } else {
            return None;
        };

        let slot = synthesize_slot(history, observed_high, observed_low, stagnant, seed);
        let mut next = *history;
        next.push(slot);

        Some(CycleShift {
            trigger,
            history: next,
            new_slot: slot,
        })
    }
}

/// Build the synthetic slot-1 value for a roll.
///
/// The spread widens to ±15% when the history is stagnant (±8% otherwise),
/// the low mirrors the high so the two move apart, and a result within 5%
/// of any existing slot is re-rolled in the opposite direction at 10–20%.
fn synthesize_slot(
    history: &CycleHistory,
    observed_high: f64,
    observed_low: f64,
    stagnant: bool,
    seed: u64,
) -> CycleSlot {
    let mut rng = StdRng::seed_from_u64(seed);

    let base = if stagnant { 0.15 } else { 0.08 };
    let factor = 1.0 + rng.gen_range(-base..=base);
    let (high, low) = spread_prices(observed_high, observed_low, factor);

    if !history.has_similar(high, low, SIMILARITY_PCT) {
        return CycleSlot::new(high, low);
    }

    // Too close to an existing cycle: flip the direction and push harder.
    let correction = rng.gen_range(0.1..=0.2);
    let factor = if factor > 1.0 {
        1.0 - correction
    } else {
        1.0 + correction
    };
    let (high, low) = spread_prices(observed_high, observed_low, factor);
    CycleSlot::new(high, low)
}

/// Apply a spread factor to the high and its mirror to the low, keeping the
/// low strictly below the high.
fn spread_prices(observed_high: f64, observed_low: f64, factor: f64) -> (f64, f64) {
    let high = observed_high * factor;
    let mut low = observed_low * (2.0 - factor);
    if low >= high {
        low = high * LOW_CLAMP;
    }
    (high, low)
}

/// Stable FNV-1a hash of a symbol, the base for per-symbol seeds.
pub fn symbol_seed(symbol: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in symbol.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// First history slot for a newly registered coin: a ±3% band with a small
/// per-symbol jitter so freshly added coins do not all start alike.
pub fn seed_slot(symbol: &str, price: f64) -> CycleSlot {
    let mut rng = StdRng::seed_from_u64(symbol_seed(symbol));
    let adjustment = rng.gen_range(0.98..=1.02);
    CycleSlot::new(price * 1.03 * adjustment, price * 0.97 / adjustment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CYCLE_DEPTH;

    fn history_of(slots: &[(f64, f64)]) -> CycleHistory {
        let mut history = CycleHistory::default();
        for &(high, low) in slots.iter().rev() {
            history.push(CycleSlot::new(high, low));
        }
        history
    }

    fn flat_history(high: f64, low: f64) -> CycleHistory {
        history_of(&[(high, low); CYCLE_DEPTH])
    }

    #[test]
    fn test_bootstrap_takes_raw_extrema() {
        let engine = CycleEngine::default();
        let shift = engine
            .evaluate(&CycleHistory::default(), 100.0, 102.0, 98.0, 100.0, 7)
            .expect("empty history must initialize");

        assert_eq!(shift.trigger, CycleTrigger::Bootstrap);
        assert_eq!(shift.new_slot, CycleSlot::new(102.0, 98.0));
        assert_eq!(shift.history.newest(), CycleSlot::new(102.0, 98.0));
        assert_eq!(shift.history.initialized_count(), 1);
    }

    #[test]
    fn test_completion_fires_below_threshold() {
        // stored high 100, 2% threshold: 97.9 < 98 completes the cycle.
        let engine = CycleEngine::new(2.0);
        let history = history_of(&[(105.0, 95.0), (90.0, 80.0)]);
        let shift = engine
            .evaluate(&history, 100.0, 100.0, 90.0, 97.9, 7)
            .expect("retracement past threshold must roll");
        assert_eq!(shift.trigger, CycleTrigger::Completed);
    }

    #[test]
    fn test_no_trigger_leaves_history_untouched() {
        let engine = CycleEngine::new(2.0);
        let history = history_of(&[(105.0, 95.0), (90.0, 80.0)]);

        // 98.5 is inside the 2% band and below the 5% breakout.
        assert!(engine
            .evaluate(&history, 100.0, 100.0, 90.0, 98.5, 7)
            .is_none());
        // A second identical call still refuses to mutate.
        assert!(engine
            .evaluate(&history, 100.0, 100.0, 90.0, 98.5, 99)
            .is_none());
    }

    #[test]
    fn test_significant_increase_fires_above_breakout() {
        let engine = CycleEngine::new(2.0);
        let history = history_of(&[(105.0, 95.0), (90.0, 80.0)]);
        let shift = engine
            .evaluate(&history, 100.0, 106.0, 90.0, 106.0, 7)
            .expect("5% breakout must roll");
        assert_eq!(shift.trigger, CycleTrigger::SignificantIncrease);
    }

    #[test]
    fn test_completed_outranks_other_triggers() {
        // A flat history is stagnant, but the retracement reason wins.
        let engine = CycleEngine::new(2.0);
        let history = flat_history(100.0, 90.0);
        let shift = engine
            .evaluate(&history, 100.0, 100.0, 90.0, 95.0, 7)
            .expect("completion must roll");
        assert_eq!(shift.trigger, CycleTrigger::Completed);
    }

    #[test]
    fn test_shift_is_fifo_and_depth_stays_fixed() {
        let engine = CycleEngine::new(2.0);
        let slots: Vec<(f64, f64)> = (0..CYCLE_DEPTH)
            .map(|i| (200.0 + i as f64, 100.0 + i as f64))
            .collect();
        let history = history_of(&slots);

        let shift = engine
            .evaluate(&history, 100.0, 100.0, 90.0, 95.0, 7)
            .expect("completion must roll");

        assert_eq!(shift.history.slots().len(), CYCLE_DEPTH);
        assert_eq!(shift.history.newest(), shift.new_slot);
        // Every surviving slot moved exactly one position older.
        for i in 0..CYCLE_DEPTH - 1 {
            assert_eq!(shift.history.slots()[i + 1], history.slots()[i]);
        }
        // The oldest pre-shift slot is gone.
        assert!(!shift
            .history
            .slots()
            .iter()
            .any(|s| *s == history.slots()[CYCLE_DEPTH - 1]));
    }

    #[test]
    fn test_stagnant_refresh_escapes_the_flat_value() {
        let engine = CycleEngine::new(2.0);
        let history = flat_history(100.0, 90.0);

        for seed in 0..64 {
            let shift = engine
                .evaluate(&history, 100.0, 100.0, 90.0, 99.0, seed)
                .expect("stagnant history must refresh");
            assert_eq!(shift.trigger, CycleTrigger::Stagnant);

            let slot = shift.new_slot;
            let high_moved = (slot.high - 100.0).abs() / 100.0 > 0.05;
            let low_moved = (slot.low - 90.0).abs() / 90.0 > 0.05;
            assert!(
                high_moved || low_moved,
                "seed {} produced a near-duplicate slot {:?}",
                seed,
                slot
            );
        }
    }

    #[test]
    fn test_low_stays_below_high_across_seeds() {
        let engine = CycleEngine::new(2.0);
        let history = flat_history(100.0, 99.5);

        for seed in 0..256 {
            let shift = engine
                .evaluate(&history, 100.0, 100.0, 99.5, 95.0, seed)
                .expect("completion must roll");
            assert!(
                shift.new_slot.low < shift.new_slot.high,
                "seed {} broke the low < high invariant: {:?}",
                seed,
                shift.new_slot
            );
        }
    }

    #[test]
    fn test_same_seed_reproduces_the_same_slot() {
        let engine = CycleEngine::new(2.0);
        let history = history_of(&[(105.0, 95.0), (90.0, 80.0)]);

        let a = engine.evaluate(&history, 100.0, 100.0, 90.0, 95.0, 42);
        let b = engine.evaluate(&history, 100.0, 100.0, 90.0, 95.0, 42);
        assert_eq!(a, b);

        let c = engine.evaluate(&history, 100.0, 100.0, 90.0, 95.0, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn test_symbol_seed_is_stable_and_distinct() {
        assert_eq!(symbol_seed("BTCUSDT"), symbol_seed("BTCUSDT"));
        assert_ne!(symbol_seed("BTCUSDT"), symbol_seed("ETHUSDT"));
    }

    #[test]
    fn test_seed_slot_brackets_the_price() {
        let slot = seed_slot("BTCUSDT", 100.0);
        assert!(slot.high > 100.0);
        assert!(slot.low < 100.0);
        // Deterministic per symbol.
        assert_eq!(slot, seed_slot("BTCUSDT", 100.0));
        assert_ne!(slot, seed_slot("ETHUSDT", 100.0));
    }
}
