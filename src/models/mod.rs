use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of retained cycles per symbol.
pub const CYCLE_DEPTH: usize = 10;

/// One completed price cycle: the high/low extremes it spanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSlot {
    pub high: f64,
    pub low: f64,
}

impl CycleSlot {
    pub fn new(high: f64, low: f64) -> Self {
        Self { high, low }
    }

    /// Slots hold (0.0, 0.0) until a cycle lands in them.
    pub fn is_empty(&self) -> bool {
        self.high == 0.0 && self.low == 0.0
    }
}

/// Fixed-depth rolling history of completed cycles.
///
/// Index 0 is the most recent cycle, index 9 the oldest. The depth never
/// changes; rolling forward discards the oldest slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleHistory([CycleSlot; CYCLE_DEPTH]);

impl CycleHistory {
    pub fn from_slots(slots: [CycleSlot; CYCLE_DEPTH]) -> Self {
        Self(slots)
    }

    pub fn slots(&self) -> &[CycleSlot; CYCLE_DEPTH] {
        &self.0
    }

    pub fn newest(&self) -> CycleSlot {
        self.0[0]
    }

    pub fn set_newest(&mut self, slot: CycleSlot) {
        self.0[0] = slot;
    }

    /// FIFO shift: every slot moves one position older, the oldest slot is
    /// discarded and `slot` becomes the newest.
    pub fn push(&mut self, slot: CycleSlot) {
        self.0.rotate_right(1);
        self.0[0] = slot;
    }

    pub fn initialized_count(&self) -> usize {
        self.0.iter().filter(|s| !s.is_empty()).count()
    }

    /// True when at least two slots are initialized and every initialized
    /// slot matches the newest within `epsilon` on both coordinates.
    pub fn is_stagnant(&self, epsilon: f64) -> bool {
        if self.initialized_count() < 2 {
            return false;
        }
        let first = self.newest();
        self.0
            .iter()
            .filter(|s| !s.is_empty())
            .all(|s| (s.high - first.high).abs() <= epsilon && (s.low - first.low).abs() <= epsilon)
    }

    /// True when `(high, low)` lies within `pct` relative distance of some
    /// initialized slot on both coordinates.
    pub fn has_similar(&self, high: f64, low: f64, pct: f64) -> bool {
        self.0.iter().any(|s| {
            if s.high == 0.0 || s.low == 0.0 {
                return false;
            }
            (high - s.high).abs() / s.high < pct && (low - s.low).abs() / s.low < pct
        })
    }
}

/// Trend label derived from the moving-average stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "UP",
            Trend::Down => "DOWN",
            Trend::Neutral => "Neutral",
        }
    }

    /// Parse the stored label, treating anything unrecognized as Neutral.
    pub fn from_label(label: &str) -> Self {
        match label {
            "UP" => Trend::Up,
            "DOWN" => Trend::Down,
            _ => Trend::Neutral,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-symbol monitoring record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinRecord {
    pub id: i64,
    pub symbol: String,
    pub initial_price: f64,
    pub low_price: f64,
    pub high_price: f64,
    pub latest_price: f64,
    pub ma7: f64,
    pub ma25: f64,
    pub ma99: f64,
    pub trend: Trend,
    pub cycle_status: String,
    pub cycle_history: CycleHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update request: only populated fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoinUpdate {
    pub latest_price: Option<f64>,
    pub low_price: Option<f64>,
    pub high_price: Option<f64>,
    pub cycle_history: Option<CycleHistory>,
}

/// One retained price observation, bounded per symbol for moving averages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub symbol: String,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

/// A single exchange trade. `is_buyer_maker` marks the passive buyer, i.e.
/// an aggressive sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub qty: f64,
    /// Epoch milliseconds.
    pub time: i64,
    pub is_buyer_maker: bool,
}
