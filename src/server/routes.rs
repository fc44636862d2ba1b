use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::analysis::TradeSummary;
use crate::error::MonitorError;
use crate::models::{CoinRecord, CoinUpdate};

use super::AppState;

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/coins", get(list_coins).post(add_coin))
        .route("/api/coins/refresh", post(refresh_prices))
        .route("/api/coins/reseed-history", post(reseed_history))
        .route("/api/coins/resync-initial", post(resync_initial))
        .route("/api/coins/:symbol", get(get_coin).put(update_coin))
        .route("/api/coins/:symbol/history", get(coin_history))
        .route("/api/coins/:symbol/trades", get(coin_trades))
}

async fn list_coins(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CoinRecord>>, MonitorError> {
    Ok(Json(state.store.all_records().await?))
}

#[derive(Debug, Deserialize)]
struct AddCoinRequest {
    symbol: String,
}

async fn add_coin(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddCoinRequest>,
) -> Result<Json<Value>, MonitorError> {
    let symbol = request.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(MonitorError::Validation("symbol must not be empty".into()));
    }

    // Rejects symbols the exchange does not know.
    let price = state.feed.price(&symbol).await?;
    let record = state.store.add_coin(&symbol, price).await?;

    Ok(Json(json!({
        "message": format!("Added {symbol} to monitoring with initial price {price}"),
        "record": record,
    })))
}

async fn get_coin(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CoinRecord>, MonitorError> {
    Ok(Json(state.store.record(&symbol).await?))
}

async fn update_coin(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(update): Json<CoinUpdate>,
) -> Result<Json<CoinRecord>, MonitorError> {
    Ok(Json(state.store.apply_update(&symbol, &update).await?))
}

async fn refresh_prices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, MonitorError> {
    let outcome = state.monitor.poll_once().await?;

    Ok(Json(json!({
        "message": format!(
            "Updated prices for {} coins, rolled history for {}",
            outcome.updated, outcome.shifted
        ),
    })))
}

async fn coin_history(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, MonitorError> {
    let record = state.store.record(&symbol).await?;
    Ok(Json(history_document(&record)))
}

async fn coin_trades(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TradeSummary>, MonitorError> {
    Ok(Json(state.analyzer.analyze(&symbol).await?))
}

async fn reseed_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, MonitorError> {
    let updated = state.store.reseed_histories(true).await?;

    Ok(Json(json!({
        "message": format!("Reseeded cycle history for {updated} coins"),
    })))
}

async fn resync_initial(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, MonitorError> {
    let prices = state.feed.all_prices().await?;
    let updated = state.store.resync_initial_prices(&prices).await?;

    Ok(Json(json!({
        "message": format!("Resynced initial prices for {updated} coins"),
    })))
}

/// Structured history view: current state, moving averages, trend, and the
/// initialized slots with each one's predecessor high for charting.
fn history_document(record: &CoinRecord) -> Value {
    let slots = record.cycle_history.slots();

    let mut history = Vec::new();
    for (i, slot) in slots.iter().enumerate() {
        if slot.is_empty() {
            continue;
        }

        // High of the next-older cycle, when that slot is populated.
        let prev_cycle_high = slots
            .get(i + 1)
            .filter(|older| !older.is_empty())
            .map(|older| older.high);

        history.push(json!({
            "set": i + 1,
            "high_price": slot.high,
            "low_price": slot.low,
            "prev_cycle_high": prev_cycle_high,
        }));
    }

    json!({
        "symbol": record.symbol,
        "initial_price": record.initial_price,
        "current": {
            "low_price": record.low_price,
            "high_price": record.high_price,
            "latest_price": record.latest_price,
        },
        "moving_averages": {
            "ma7": record.ma7,
            "ma25": record.ma25,
            "ma99": record.ma99,
        },
        "trend_analysis": {
            "trend": record.trend,
            "cycle_status": record.cycle_status,
        },
        "history": history,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CycleHistory, CycleSlot, Trend};
    use chrono::Utc;

    fn record_with_history(history: CycleHistory) -> CoinRecord {
        CoinRecord {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            initial_price: 100.0,
            low_price: 95.0,
            high_price: 110.0,
            latest_price: 105.0,
            ma7: 104.0,
            ma25: 102.0,
            ma99: 0.0,
            trend: Trend::Up,
            cycle_status: "UP Cycle – bullish momentum".to_string(),
            cycle_history: history,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_document_skips_empty_slots() {
        let mut history = CycleHistory::default();
        history.push(CycleSlot::new(100.0, 90.0));
        history.push(CycleSlot::new(110.0, 95.0));

        let doc = history_document(&record_with_history(history));
        let entries = doc["history"].as_array().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["set"], 1);
        assert_eq!(entries[0]["high_price"], 110.0);
        // Slot 1's predecessor is slot 2's high.
        assert_eq!(entries[0]["prev_cycle_high"], 100.0);
        // The oldest populated slot has no predecessor.
        assert!(entries[1]["prev_cycle_high"].is_null());
    }

    #[test]
    fn test_history_document_shape() {
        let doc = history_document(&record_with_history(CycleHistory::default()));

        assert_eq!(doc["symbol"], "BTCUSDT");
        assert_eq!(doc["current"]["latest_price"], 105.0);
        assert_eq!(doc["moving_averages"]["ma7"], 104.0);
        assert_eq!(doc["trend_analysis"]["trend"], "UP");
        assert_eq!(doc["history"].as_array().unwrap().len(), 0);
    }
}
