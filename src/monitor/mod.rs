use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::analysis::cycle::{symbol_seed, CycleEngine};
use crate::analysis::trend;
use crate::api::BinanceClient;
use crate::db::{CoinStore, TickWrite};
use crate::indicators;
use crate::Result;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

/// Counts for one completed poll tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    /// Symbols whose record was refreshed this tick.
    pub updated: usize,
    /// Symbols whose cycle history rolled forward.
    pub shifted: usize,
}

/// Background poller: one batch price fetch per period, then a sequential
/// per-symbol read-modify-write.
///
/// Every per-symbol mutation runs inside its own transaction with the row
/// locked, so an API-triggered update on the same symbol can never interleave
/// with the shift.
pub struct PriceMonitor {
    feed: BinanceClient,
    store: Arc<CoinStore>,
    engine: CycleEngine,
    poll_interval: Duration,
    quote_suffix: String,
}

impl PriceMonitor {
    pub fn new(
        feed: BinanceClient,
        store: Arc<CoinStore>,
        engine: CycleEngine,
        poll_interval: Duration,
        quote_suffix: String,
    ) -> Self {
        Self {
            feed,
            store,
            engine,
            poll_interval,
            quote_suffix,
        }
    }

    /// Seed the tracked universe from the feed and realign stored prices
    /// with the live market. Runs once before the poll loop starts.
    pub async fn bootstrap(&self) -> Result<()> {
        let prices = self.feed.all_prices().await?;

        let added = self.store.bulk_register(&prices, &self.quote_suffix).await?;
        tracing::info!("Registered {} new symbols from the ticker universe", added);

        let resynced = self.store.resync_initial_prices(&prices).await?;
        tracing::info!("Resynced initial prices for {} symbols", resynced);

        Ok(())
    }

    /// Run the poll loop forever. Tick failures are logged and the loop
    /// simply waits for its next wake.
    pub async fn run(&self) {
        tracing::info!(
            "Price monitor polling every {}s",
            self.poll_interval.as_secs()
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.poll_once().await {
                Ok(outcome) => tracing::info!(
                    "Updated prices for {} coins, rolled history for {}",
                    outcome.updated,
                    outcome.shifted
                ),
                Err(e) => tracing::error!("Poll tick failed: {}", e),
            }
        }
    }

    /// One tick: fetch the batch, then update every tracked symbol that has
    /// a price in it. Per-symbol failures skip that symbol only.
    pub async fn poll_once(&self) -> Result<TickOutcome> {
        let prices = self.feed.all_prices().await?;
        let symbols = self.store.symbols().await?;

        let mut outcome = TickOutcome::default();
        for symbol in &symbols {
            let Some(&price) = prices.get(symbol) else {
                continue;
            };

            match self.apply_tick(symbol, price).await {
                Ok(shifted) => {
                    outcome.updated += 1;
                    if shifted {
                        outcome.shifted += 1;
                    }
                }
                Err(e) => tracing::warn!("Tick skipped for {}: {}", symbol, e),
            }
        }

        Ok(outcome)
    }

    /// Process one symbol's tick atomically. Returns whether the cycle
    /// history rolled.
    async fn apply_tick(&self, symbol: &str, latest_price: f64) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let record = self.store.record_for_update(&mut tx, symbol).await?;

        let high_price = record.high_price.max(latest_price);
        let low_price = record.low_price.min(latest_price);

        self.store.insert_sample(&mut tx, symbol, latest_price).await?;
        self.store.prune_samples(&mut tx, symbol).await?;

        let prices = self
            .store
            .recent_prices(&mut tx, symbol, indicators::MA_LONG as i64)
            .await?;
        let (ma7, ma25, ma99) = indicators::moving_averages(&prices);
        let (trend, cycle_status) = trend::classify(latest_price, ma7, ma25, ma99);

        let seed = symbol_seed(symbol) ^ Utc::now().timestamp() as u64;
        let shift = self.engine.evaluate(
            &record.cycle_history,
            record.high_price,
            high_price,
            low_price,
            latest_price,
            seed,
        );

        if let Some(shift) = &shift {
            tracing::info!(
                "Rolled cycle history for {} ({}): new high {:.8}, new low {:.8}",
                symbol,
                shift.trigger,
                shift.new_slot.high,
                shift.new_slot.low
            );
        }

        self.store
            .write_tick(
                &mut tx,
                symbol,
                &TickWrite {
                    latest_price,
                    high_price,
                    low_price,
                    ma7,
                    ma25,
                    ma99,
                    trend,
                    cycle_status: &cycle_status,
                    history: shift.as_ref().map(|s| &s.history),
                },
            )
            .await?;

        tx.commit().await?;

        Ok(shift.is_some())
    }
}
