mod common;

use checkout_engine::events::Event;
use chrono::Utc;
use common::TestContext;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn expired_cart_is_reset_and_stock_restored_on_next_access() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(4.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 3).await.unwrap();
    ctx.services
        .cart
        .apply_coupon(user, "DISCOUNT10")
        .await
        .unwrap();
    assert_eq!(ctx.available(mug).await, 7);

    ctx.expire_cart(user).await;
    let cart = ctx.services.cart.get_cart(user).await.unwrap();

    assert!(cart.items.is_empty());
    assert_eq!(cart.coupon_code, None);
    assert_eq!(cart.total, dec!(0));
    assert!(cart.expires_at > Utc::now());
    assert_eq!(ctx.available(mug).await, 10);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctx.metrics.abandonments(), 1);
    assert!(ctx
        .events
        .snapshot()
        .iter()
        .any(|event| matches!(event, Event::CartExpired { released: 3, .. })));
}

#[tokio::test]
async fn add_after_expiry_starts_from_an_empty_cart() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(4.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 5).await.unwrap();

    ctx.expire_cart(user).await;
    let cart = ctx.services.cart.add_item(user, mug, 2).await.unwrap();

    assert_eq!(cart.item(mug).unwrap().quantity, 2);
    assert_eq!(ctx.available(mug).await, 8);
}

#[tokio::test]
async fn mutations_extend_expiry() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(4.00), dec!(0), 10).await;

    let first = ctx.services.cart.add_item(user, mug, 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = ctx.services.cart.update_item(user, mug, 2).await.unwrap();

    assert!(second.expires_at > first.expires_at);
}

#[tokio::test]
async fn sweep_releases_abandoned_carts_without_owner_access() {
    let ctx = TestContext::new().await;
    let mug = ctx.seed_product("Mug", dec!(4.00), dec!(0), 20).await;
    let abandoned = Uuid::new_v4();
    let active = Uuid::new_v4();
    let emptied = Uuid::new_v4();

    ctx.services.cart.add_item(abandoned, mug, 4).await.unwrap();
    ctx.services.cart.add_item(active, mug, 2).await.unwrap();
    ctx.services.cart.ensure_cart(emptied).await.unwrap();
    ctx.expire_cart(abandoned).await;
    ctx.expire_cart(emptied).await;
    assert_eq!(ctx.available(mug).await, 14);

    let reset = ctx.services.cart.sweep_expired_carts(50).await.unwrap();

    assert_eq!(reset, 1);
    assert_eq!(ctx.available(mug).await, 18);
    let still_active = ctx.services.cart.get_cart(active).await.unwrap();
    assert_eq!(still_active.item(mug).unwrap().quantity, 2);

    assert_eq!(ctx.services.cart.sweep_expired_carts(50).await.unwrap(), 0);
}
