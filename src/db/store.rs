use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::{HashMap, HashSet};

use crate::analysis::cycle::{seed_slot, STAGNANT_EPSILON};
use crate::error::MonitorError;
use crate::models::{
    CoinRecord, CoinUpdate, CycleHistory, CycleSlot, PriceSample, Trend, CYCLE_DEPTH,
};
use crate::Result;

/// Retained price samples per symbol for moving-average computation.
pub const SAMPLE_RETENTION: i64 = 100;

/// Extrema seeded around the registration price: ±2%.
const INITIAL_BAND: f64 = 0.02;

const RECORD_COLUMNS: &str = "id, symbol, initial_price, low_price, high_price, latest_price, \
    high_price_1, low_price_1, high_price_2, low_price_2, high_price_3, low_price_3, \
    high_price_4, low_price_4, high_price_5, low_price_5, high_price_6, low_price_6, \
    high_price_7, low_price_7, high_price_8, low_price_8, high_price_9, low_price_9, \
    high_price_10, low_price_10, ma7, ma25, ma99, trend, cycle_status, created_at, updated_at";

/// Everything one poll tick writes back for a symbol, in a single UPDATE so
/// a failure rolls back atomically with the rest of the transaction.
pub struct TickWrite<'a> {
    pub latest_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub ma7: f64,
    pub ma25: f64,
    pub ma99: f64,
    pub trend: Trend,
    pub cycle_status: &'a str,
    /// Present only when the cycle engine rolled the history this tick.
    pub history: Option<&'a CycleHistory>,
}

/// Postgres-backed store for coin records and the price-sample log.
///
/// This is the single data-access layer; nothing above it ever touches SQL
/// or branches on the backend.
pub struct CoinStore {
    pool: PgPool,
}

impl CoinStore {
    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    fn record_from_row(row: &PgRow) -> Result<CoinRecord> {
        let mut slots = [CycleSlot::default(); CYCLE_DEPTH];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.high = row.try_get(format!("high_price_{}", i + 1).as_str())?;
            slot.low = row.try_get(format!("low_price_{}", i + 1).as_str())?;
        }

        let trend_label: String = row.try_get("trend")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(CoinRecord {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            initial_price: row.try_get("initial_price")?,
            low_price: row.try_get("low_price")?,
            high_price: row.try_get("high_price")?,
            latest_price: row.try_get("latest_price")?,
            ma7: row.try_get("ma7")?,
            ma25: row.try_get("ma25")?,
            ma99: row.try_get("ma99")?,
            trend: Trend::from_label(&trend_label),
            cycle_status: row.try_get("cycle_status")?,
            cycle_history: CycleHistory::from_slots(slots),
            created_at,
            updated_at,
        })
    }

    /// All records ordered by symbol.
    pub async fn all_records(&self) -> Result<Vec<CoinRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM coin_monitor ORDER BY symbol");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    /// One record by symbol.
    pub async fn record(&self, symbol: &str) -> Result<CoinRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM coin_monitor WHERE symbol = $1");
        let row = sqlx::query(&sql)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => Err(MonitorError::NotFound(symbol.to_string())),
        }
    }

    /// Every tracked symbol, ordered.
    pub async fn symbols(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM coin_monitor ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("symbol")).collect())
    }

    /// Apply a partial update; only populated fields change, `updated_at`
    /// always refreshes. Returns the record as stored afterwards.
    pub async fn apply_update(&self, symbol: &str, update: &CoinUpdate) -> Result<CoinRecord> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<f64> = Vec::new();

        let push = |sets: &mut Vec<String>, values: &mut Vec<f64>, col: &str, value: f64| {
            values.push(value);
            sets.push(format!("{col} = ${}", values.len()));
        };

        if let Some(v) = update.latest_price {
            push(&mut sets, &mut values, "latest_price", v);
        }
        if let Some(v) = update.low_price {
            push(&mut sets, &mut values, "low_price", v);
        }
        if let Some(v) = update.high_price {
            push(&mut sets, &mut values, "high_price", v);
        }
        if let Some(history) = &update.cycle_history {
            for (i, slot) in history.slots().iter().enumerate() {
                push(&mut sets, &mut values, &format!("high_price_{}", i + 1), slot.high);
                push(&mut sets, &mut values, &format!("low_price_{}", i + 1), slot.low);
            }
        }

        sets.push("updated_at = NOW()".to_string());

        let sql = format!(
            "UPDATE coin_monitor SET {} WHERE symbol = ${}",
            sets.join(", "),
            values.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = query.bind(value);
        }
        let result = query.bind(symbol).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound(symbol.to_string()));
        }

        self.record(symbol).await
    }

    /// Register a new symbol: extrema seeded at ±2% of the current price,
    /// first history slot at ±3% with per-symbol jitter.
    pub async fn add_coin(&self, symbol: &str, price: f64) -> Result<CoinRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO coin_monitor (symbol, initial_price, low_price, high_price, latest_price)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(price)
        .bind(price * (1.0 - INITIAL_BAND))
        .bind(price * (1.0 + INITIAL_BAND))
        .bind(price)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::AlreadyTracked(symbol.to_string()));
        }

        self.write_first_slot(symbol, price).await?;

        tracing::info!("Registered {} at {}", symbol, price);

        self.record(symbol).await
    }

    /// Seed slot 1 with the per-symbol jittered band.
    async fn write_first_slot(&self, symbol: &str, price: f64) -> Result<()> {
        let slot = seed_slot(symbol, price);

        sqlx::query(
            r#"
            UPDATE coin_monitor
            SET high_price_1 = $1, low_price_1 = $2, updated_at = NOW()
            WHERE symbol = $3
            "#,
        )
        .bind(slot.high)
        .bind(slot.low)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register every symbol from a feed snapshot that matches the quote
    /// suffix and is not tracked yet. Returns how many were added.
    pub async fn bulk_register(
        &self,
        prices: &HashMap<String, f64>,
        quote_suffix: &str,
    ) -> Result<usize> {
        let existing: HashSet<String> = self.symbols().await?.into_iter().collect();

        let mut candidates: Vec<&String> = prices
            .keys()
            .filter(|s| s.ends_with(quote_suffix) && !existing.contains(*s))
            .collect();
        candidates.sort();

        let mut added = 0;
        for symbol in candidates {
            match self.add_coin(symbol, prices[symbol]).await {
                Ok(_) => added += 1,
                // Lost a race with a concurrent registration; fine.
                Err(MonitorError::AlreadyTracked(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(added)
    }

    /// Reset initial/low/high/latest to the current feed price for every
    /// tracked symbol present in the snapshot. Used after a restart so the
    /// extrema restart from reality instead of stale values.
    pub async fn resync_initial_prices(&self, prices: &HashMap<String, f64>) -> Result<usize> {
        let mut updated = 0;

        for symbol in self.symbols().await? {
            let Some(&price) = prices.get(&symbol) else {
                continue;
            };

            sqlx::query(
                r#"
                UPDATE coin_monitor
                SET initial_price = $1, low_price = $1, high_price = $1, latest_price = $1,
                    updated_at = NOW()
                WHERE symbol = $2
                "#,
            )
            .bind(price)
            .bind(&symbol)
            .execute(&self.pool)
            .await?;

            updated += 1;
        }

        Ok(updated)
    }

    /// Re-jitter slot 1 for coins whose history is missing, still filling
    /// up, or flat. `force` reseeds every coin regardless.
    pub async fn reseed_histories(&self, force: bool) -> Result<usize> {
        let mut updated = 0;

        for record in self.all_records().await? {
            let history = &record.cycle_history;
            let needs = force
                || history.newest().is_empty()
                || history.initialized_count() < CYCLE_DEPTH
                || history.is_stagnant(STAGNANT_EPSILON);

            if !needs {
                continue;
            }

            self.write_first_slot(&record.symbol, record.latest_price)
                .await?;
            updated += 1;
        }

        tracing::info!("Reseeded cycle history for {} coins", updated);

        Ok(updated)
    }

    /// Most recent retained samples for a symbol, newest first.
    pub async fn recent_samples(&self, symbol: &str, limit: i64) -> Result<Vec<PriceSample>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, price, ts FROM price_history
            WHERE symbol = $1
            ORDER BY ts DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PriceSample {
                symbol: row.get("symbol"),
                price: row.get("price"),
                ts: row.get("ts"),
            })
            .collect())
    }

    // ==================== TICK TRANSACTION PATH ====================

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Read one record holding its row lock for the rest of the
    /// transaction, so concurrent history shifts on the same symbol
    /// serialize instead of both reading pre-shift state.
    pub async fn record_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
    ) -> Result<CoinRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM coin_monitor WHERE symbol = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(symbol)
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => Err(MonitorError::NotFound(symbol.to_string())),
        }
    }

    /// Append a price sample inside the tick transaction.
    pub async fn insert_sample(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
        price: f64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO price_history (symbol, price) VALUES ($1, $2)")
            .bind(symbol)
            .bind(price)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Drop everything but the newest retained samples for a symbol.
    pub async fn prune_samples(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM price_history
            WHERE symbol = $1
              AND id NOT IN (
                SELECT id FROM price_history
                WHERE symbol = $1
                ORDER BY ts DESC, id DESC
                LIMIT $2
              )
            "#,
        )
        .bind(symbol)
        .bind(SAMPLE_RETENTION)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Newest-first prices for the moving-average stack, read inside the
    /// tick transaction so they include this tick's sample.
    pub async fn recent_prices(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<f64>> {
        let rows = sqlx::query(
            r#"
            SELECT price FROM price_history
            WHERE symbol = $1
            ORDER BY ts DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.iter().map(|row| row.get("price")).collect())
    }

    /// Persist a tick's results in one statement.
    pub async fn write_tick(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
        write: &TickWrite<'_>,
    ) -> Result<()> {
        let mut sets = vec![
            "latest_price = $1".to_string(),
            "high_price = $2".to_string(),
            "low_price = $3".to_string(),
            "ma7 = $4".to_string(),
            "ma25 = $5".to_string(),
            "ma99 = $6".to_string(),
            "trend = $7".to_string(),
            "cycle_status = $8".to_string(),
            "updated_at = NOW()".to_string(),
        ];

        let mut next_param = 9;
        if write.history.is_some() {
            for i in 1..=CYCLE_DEPTH {
                sets.push(format!("high_price_{i} = ${next_param}"));
                next_param += 1;
                sets.push(format!("low_price_{i} = ${next_param}"));
                next_param += 1;
            }
        }

        let sql = format!(
            "UPDATE coin_monitor SET {} WHERE symbol = ${}",
            sets.join(", "),
            next_param
        );

        let mut query = sqlx::query(&sql)
            .bind(write.latest_price)
            .bind(write.high_price)
            .bind(write.low_price)
            .bind(write.ma7)
            .bind(write.ma25)
            .bind(write.ma99)
            .bind(write.trend.as_str())
            .bind(write.cycle_status);

        if let Some(history) = write.history {
            for slot in history.slots() {
                query = query.bind(slot.high).bind(slot.low);
            }
        }

        let result = query.bind(symbol).execute(&mut **tx).await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound(symbol.to_string()));
        }

        Ok(())
    }
}
