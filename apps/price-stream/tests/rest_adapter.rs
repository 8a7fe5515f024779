#![allow(clippy::unwrap_used, clippy::expect_used)]
//! REST adapter tests against a mock Alpaca HTTP server.

use std::time::Duration;

use chrono::NaiveDate;
use price_stream::infrastructure::alpaca::AlpacaRestClient;
use price_stream::infrastructure::config::Credentials;
use price_stream::{MarketDataError, PriceSource, TradingCalendar};
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AlpacaRestClient {
    AlpacaRestClient::new(
        Credentials::new("key-id".to_string(), "secret-key".to_string()),
        server.uri(),
        format!("{}/", server.uri()),
        Duration::from_secs(2),
    )
    .unwrap()
}

fn ok(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

#[tokio::test]
async fn quote_ask_wins_and_sends_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/stocks/AAPL/quotes/latest"))
        .and(header("APCA-API-KEY-ID", "key-id"))
        .and(header("APCA-API-SECRET-KEY", "secret-key"))
        .respond_with(ok(json!({"symbol": "AAPL", "quote": {"ap": 187.3, "bp": 187.1}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/AAPL/trades/latest"))
        .respond_with(ok(json!({"trade": {"p": 1.0}})))
        .expect(0)
        .mount(&server)
        .await;

    let price = client(&server).latest_price("AAPL").await.unwrap();
    assert_eq!(price, Some(Decimal::new(1873, 1)));
}

#[tokio::test]
async fn quote_bid_used_when_ask_is_zero() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/stocks/AAPL/quotes/latest"))
        .respond_with(ok(json!({"quote": {"ap": 0, "bp": 187.1}})))
        .mount(&server)
        .await;

    let price = client(&server).latest_price("AAPL").await.unwrap();
    assert_eq!(price, Some(Decimal::new(1871, 1)));
}

#[tokio::test]
async fn falls_through_to_trade_then_bar() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/stocks/MSFT/quotes/latest"))
        .respond_with(ok(json!({"quote": {"ap": 0, "bp": 0}})))
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/MSFT/trades/latest"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream busy"))
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/MSFT/bars"))
        .and(query_param("timeframe", "1Day"))
        .and(query_param("limit", "1"))
        .and(query_param("sort", "desc"))
        .respond_with(ok(json!({"bars": [{"c": 410.25}]})))
        .mount(&server)
        .await;

    let price = client(&server).latest_price("MSFT").await.unwrap();
    assert_eq!(price, Some(Decimal::new(41025, 2)));
}

#[tokio::test]
async fn trade_price_when_quote_missing() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/stocks/TSLA/quotes/latest"))
        .respond_with(ok(json!({"quote": null})))
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/TSLA/trades/latest"))
        .respond_with(ok(json!({"trade": {"p": 250.5}})))
        .mount(&server)
        .await;

    let price = client(&server).latest_price("TSLA").await.unwrap();
    assert_eq!(price, Some(Decimal::new(2505, 1)));
}

#[tokio::test]
async fn empty_everywhere_is_none() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/stocks/ZZZZ/quotes/latest"))
        .respond_with(ok(json!({})))
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/ZZZZ/trades/latest"))
        .respond_with(ok(json!({})))
        .mount(&server)
        .await;
    Mock::given(path("/v2/stocks/ZZZZ/bars"))
        .respond_with(ok(json!({"bars": []})))
        .mount(&server)
        .await;

    assert_eq!(client(&server).latest_price("ZZZZ").await.unwrap(), None);
}

#[tokio::test]
async fn every_step_failing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = client(&server).latest_price("AAPL").await.unwrap_err();
    assert!(matches!(err, MarketDataError::Status { status: 403, .. }));
}

#[tokio::test]
async fn multibyte_error_body_is_truncated_cleanly() {
    let server = MockServer::start().await;
    let body = format!("{}é{}", "x".repeat(511), "ü".repeat(300));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string(body))
        .mount(&server)
        .await;

    let client = client(&server);
    let result = tokio::spawn(async move { client.latest_price("AAPL").await })
        .await
        .expect("lookup task panicked");

    match result.unwrap_err() {
        MarketDataError::Status { status, body } => {
            assert_eq!(status, 500);
            assert!(body.len() <= 512);
            assert!(body.starts_with("xxx"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn calendar_dates_are_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/calendar"))
        .and(query_param("start", "2026-03-09"))
        .and(query_param("end", "2026-03-13"))
        .respond_with(ok(json!([
            {"date": "2026-03-09", "open": "09:30", "close": "16:00"},
            {"date": "2026-03-10", "open": "09:30", "close": "16:00"},
            {"date": "2026-03-12", "open": "09:30", "close": "13:00"}
        ])))
        .mount(&server)
        .await;

    let start = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
    let end = NaiveDate::from_ymd_opt(2026, 3, 13).unwrap();
    let days = client(&server).trading_days(start, end).await.unwrap();

    assert_eq!(
        days,
        vec![
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 12).unwrap(),
        ]
    );
}

#[tokio::test]
async fn calendar_garbage_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/calendar"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let start = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
    let err = client(&server).trading_days(start, start).await.unwrap_err();
    assert!(matches!(err, MarketDataError::Decode(_)));
}
