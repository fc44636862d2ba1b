use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::MonitorError;
use crate::models::Trade;
use crate::Result;

pub const DEFAULT_API_BASE: &str = "https://api.binance.com";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const RATE_LIMIT_RPM: u32 = 60;
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type FeedRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance public-data client: ticker prices and recent trades.
///
/// Cloneable so the poller, the analyzer and the HTTP handlers share one
/// rate limiter. The base URL is injectable so tests can point it at a
/// local mock server.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<FeedRateLimiter>,
}

/// Entry of the all-symbols ticker; prices arrive string-encoded.
#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrade {
    price: String,
    qty: String,
    time: i64,
    is_buyer_maker: bool,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(
            NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            client,
            base_url: base_url.into(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Make a rate-limited request with retry on 429/5xx and transport errors.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if (status.as_u16() == 429 || status.is_server_error())
                        && attempt < MAX_RETRIES
                    {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Feed returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    // Terminal status: surface it as a feed error.
                    response.error_for_status()?;
                    return Err(MonitorError::FeedData(format!(
                        "unexpected status {status} from feed"
                    )));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Feed request error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(MonitorError::FeedData(format!(
            "feed unavailable after {MAX_RETRIES} attempts"
        )))
    }

    /// Current price for every listed symbol.
    ///
    /// Entries with unparseable prices are skipped rather than failing the
    /// whole batch.
    pub async fn all_prices(&self) -> Result<HashMap<String, f64>> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let response = self.get(&url).await?;
        let entries: Vec<TickerEntry> = response.json().await?;

        let mut prices = HashMap::with_capacity(entries.len());
        for entry in entries {
            match entry.price.parse::<f64>() {
                Ok(price) => {
                    prices.insert(entry.symbol, price);
                }
                Err(_) => {
                    tracing::warn!(
                        "Skipping {}: unparseable ticker price {:?}",
                        entry.symbol,
                        entry.price
                    );
                }
            }
        }

        tracing::debug!("Fetched {} ticker prices", prices.len());
        Ok(prices)
    }

    /// Current price for one symbol. A 400 from the exchange means the
    /// symbol does not exist there.
    pub async fn price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.get(&url).await.map_err(|e| match e {
            MonitorError::Feed(ref err) if err.status() == Some(StatusCode::BAD_REQUEST) => {
                MonitorError::Validation(format!("symbol {symbol} is not listed on the exchange"))
            }
            other => other,
        })?;

        let entry: TickerEntry = response.json().await?;
        entry.price.parse::<f64>().map_err(|_| {
            MonitorError::FeedData(format!(
                "unparseable ticker price {:?} for {symbol}",
                entry.price
            ))
        })
    }

    /// Most recent trades for a symbol, newest last as the exchange returns
    /// them, capped at `limit`.
    pub async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Trade>> {
        let url = format!(
            "{}/api/v3/trades?symbol={}&limit={}",
            self.base_url, symbol, limit
        );

        let response = self.get(&url).await.map_err(|e| match e {
            MonitorError::Feed(ref err) if err.status() == Some(StatusCode::BAD_REQUEST) => {
                MonitorError::NotFound(symbol.to_string())
            }
            other => other,
        })?;

        let raw: Vec<RawTrade> = response.json().await?;

        let mut trades = Vec::with_capacity(raw.len());
        for entry in raw {
            let price = entry.price.parse::<f64>().map_err(|_| {
                MonitorError::FeedData(format!("unparseable trade price {:?}", entry.price))
            })?;
            let qty = entry.qty.parse::<f64>().map_err(|_| {
                MonitorError::FeedData(format!("unparseable trade qty {:?}", entry.qty))
            })?;
            trades.push(Trade {
                price,
                qty,
                time: entry.time,
                is_buyer_maker: entry.is_buyer_maker,
            });
        }

        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_all_prices_parses_string_encoded_values() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"symbol": "BTCUSDT", "price": "43000.50"},
                    {"symbol": "ETHUSDT", "price": "2200.25"},
                    {"symbol": "BROKEN", "price": "not-a-number"}
                ]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let prices = client.all_prices().await.unwrap();

        mock.assert_async().await;
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["BTCUSDT"], 43000.50);
        assert_eq!(prices["ETHUSDT"], 2200.25);
        assert!(!prices.contains_key("BROKEN"));
    }

    #[tokio::test]
    async fn test_price_for_single_symbol() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol": "BTCUSDT", "price": "43000.50"}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let price = client.price("BTCUSDT").await.unwrap();

        mock.assert_async().await;
        assert_eq!(price, 43000.50);
    }

    #[tokio::test]
    async fn test_price_maps_bad_request_to_validation() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "NOPE".into()))
            .with_status(400)
            .with_body(r#"{"code": -1121, "msg": "Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let err = client.price("NOPE").await.unwrap_err();

        assert!(matches!(err, MonitorError::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_recent_trades_parses_and_flags_sides() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/trades")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("limit".into(), "1000".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id": 1, "price": "43000.50", "qty": "0.5", "quoteQty": "21500.25", "time": 1700000000000, "isBuyerMaker": true, "isBestMatch": true},
                    {"id": 2, "price": "43001.00", "qty": "1.5", "quoteQty": "64501.50", "time": 1700000001000, "isBuyerMaker": false, "isBestMatch": true}
                ]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let trades = client.recent_trades("BTCUSDT", 1000).await.unwrap();

        mock.assert_async().await;
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 43000.50);
        assert_eq!(trades[0].qty, 0.5);
        assert!(trades[0].is_buyer_maker);
        assert!(!trades[1].is_buyer_maker);
    }

    #[tokio::test]
    async fn test_recent_trades_unknown_symbol_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/trades")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code": -1121, "msg": "Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let err = client.recent_trades("NOPE", 1000).await.unwrap_err();

        assert!(matches!(err, MonitorError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced_after_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url()).unwrap();
        let err = client.all_prices().await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, MonitorError::Feed(_)), "got {err:?}");
    }
}
