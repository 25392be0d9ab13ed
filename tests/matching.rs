//! Scenario tests S1-S8 from the matching-engine specification, plus a
//! few of the quantified invariants, driven end to end through
//! [`matching_core::MatchingEngine`] rather than the lower-level book.

use chrono::Utc;
use matching_core::{EngineConfig, FeeSchedule, MatchingEngine, Order, OrderStatus, OrderType, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn engine(symbol: &str) -> Arc<MatchingEngine> {
    MatchingEngine::new(EngineConfig::new(symbol), None)
}

fn order(symbol: &str, side: Side, order_type: OrderType, price: Option<Decimal>, qty: Decimal) -> Order {
    Order::new(symbol, side, order_type, price, qty, "trader-1", Utc::now())
}

#[tokio::test]
async fn s1_market_sweep() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(1.0)))
        .await;
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50100)), dec!(0.5)))
        .await;

    let (accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Market, None, dec!(1.2)))
        .await;

    assert!(accepted);
    assert_eq!(trades.len(), 2);
    assert_eq!((trades[0].price, trades[0].quantity), (dec!(50000), dec!(1.0)));
    assert_eq!((trades[1].price, trades[1].quantity), (dec!(50100), dec!(0.2)));

    let depth = engine.get_depth(10).await;
    assert_eq!(depth.asks[0].quantity, dec!(0.3));
}

#[tokio::test]
async fn s2_limit_resting() {
    let engine = engine("BTC/USD");
    let (accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Limit, Some(dec!(49000)), dec!(2.0)))
        .await;

    assert!(accepted);
    assert!(trades.is_empty());
    let bbo = engine.get_bbo().await;
    assert_eq!(bbo.best_bid.unwrap().price, dec!(49000));
    assert_eq!(bbo.best_bid.unwrap().quantity, dec!(2.0));
}

#[tokio::test]
async fn s3_ioc_partial() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(0.5)))
        .await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Ioc, None, dec!(1.0)))
        .await;

    assert_eq!(trades.len(), 1);
    assert_eq!((trades[0].price, trades[0].quantity), (dec!(50000), dec!(0.5)));
    assert!(engine.get_bbo().await.best_ask.is_none());
}

#[tokio::test]
async fn s4_fok_kill() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(0.5)))
        .await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Fok, None, dec!(1.0)))
        .await;

    assert!(trades.is_empty());
    let depth = engine.get_depth(10).await;
    assert_eq!(depth.asks[0].quantity, dec!(0.5));
}

#[tokio::test]
async fn s5_fok_fill() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(2.0)))
        .await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Fok, None, dec!(1.5)))
        .await;

    assert_eq!(trades.len(), 1);
    assert_eq!((trades[0].price, trades[0].quantity), (dec!(50000), dec!(1.5)));
    let depth = engine.get_depth(10).await;
    assert_eq!(depth.asks[0].quantity, dec!(0.5));
}

#[tokio::test]
async fn s6_fees() {
    let engine = MatchingEngine::new(
        EngineConfig::new("BTC/USD").with_fee_schedule(FeeSchedule::new(dec!(0.001), dec!(0.002))),
        None,
    );
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(1.0)))
        .await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Market, None, dec!(1.0)))
        .await;

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].maker_fee, dec!(50.0));
    assert_eq!(trades[0].taker_fee, dec!(100.0));
}

#[tokio::test]
async fn s7_bbo_spread() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Limit, Some(dec!(49900)), dec!(2)))
        .await;
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50100)), dec!(1.5)))
        .await;

    let bbo = engine.get_bbo().await;
    assert_eq!(bbo.best_bid.unwrap().price, dec!(49900));
    assert_eq!(bbo.best_ask.unwrap().price, dec!(50100));
    assert_eq!(bbo.spread.unwrap(), dec!(200));
}

#[tokio::test]
async fn s8_time_priority() {
    let engine = engine("BTC/USD");
    let a = order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(1.0));
    let a_id = a.order_id;
    engine.submit(a).await;
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(1.0)))
        .await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Market, None, dec!(0.5)))
        .await;

    assert_eq!(trades[0].maker_order_id, a_id);
}

#[tokio::test]
async fn market_with_no_liquidity_is_cancelled_with_a_reason() {
    let engine = engine("BTC/USD");
    let (accepted, message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Market, None, dec!(1)))
        .await;

    assert!(accepted, "rejection is only for validation failures");
    assert!(trades.is_empty());
    assert!(message.to_lowercase().contains("liquidity"));
}

#[tokio::test]
async fn validation_rejects_without_mutating_the_book() {
    let engine = engine("BTC/USD");

    let (accepted, _message, _trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Limit, None, dec!(1)))
        .await;
    assert!(!accepted);

    let (accepted, _message, _trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Limit, Some(dec!(-5)), dec!(1)))
        .await;
    assert!(!accepted);

    assert_eq!(engine.order_count().await, 0);
}

#[tokio::test]
async fn invariant_fok_atomicity_leaves_book_untouched_on_kill() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(0.3)))
        .await;
    let before = engine.get_depth(10).await;

    let (_accepted, _message, trades) = engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Fok, Some(dec!(50000)), dec!(1.0)))
        .await;
    assert!(trades.is_empty());

    let after = engine.get_depth(10).await;
    assert_eq!(before.asks, after.asks);
}

#[tokio::test]
async fn invariant_maker_reflects_reduced_remaining_after_partial_fill() {
    let engine = engine("BTC/USD");
    engine
        .submit(order("BTC/USD", Side::Sell, OrderType::Limit, Some(dec!(50000)), dec!(2.0)))
        .await;

    engine
        .submit(order("BTC/USD", Side::Buy, OrderType::Market, None, dec!(0.75)))
        .await;

    let depth = engine.get_depth(10).await;
    assert_eq!(depth.asks[0].quantity, dec!(1.25));
}

#[tokio::test]
async fn cancel_is_reflected_in_depth_and_is_idempotent() {
    let engine = engine("BTC/USD");
    let resting = order("BTC/USD", Side::Buy, OrderType::Limit, Some(dec!(100)), dec!(1));
    let id = resting.order_id;
    engine.submit(resting).await;

    let (cancelled, returned) = engine.cancel(id).await;
    assert!(cancelled);
    assert_eq!(returned.unwrap().status, OrderStatus::Cancelled);

    let (cancelled_again, returned_again) = engine.cancel(id).await;
    assert!(!cancelled_again);
    assert!(returned_again.is_none());
}
