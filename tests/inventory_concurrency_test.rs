mod common;

use checkout_engine::{
    entities::{cart_item, order, order_item},
    errors::ServiceError,
    services::orders::OrderScope,
};
use common::{cod_checkout, TestContext};
use futures::future::join_all;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

/// Units held by carts plus units taken by stock-holding orders.
async fn committed_units(ctx: &TestContext, product: Uuid) -> i32 {
    let in_carts: i32 = cart_item::Entity::find()
        .filter(cart_item::Column::ProductId.eq(product))
        .all(&*ctx.db)
        .await
        .unwrap()
        .iter()
        .map(|line| line.quantity)
        .sum();

    let mut in_orders = 0;
    for line in order_item::Entity::find()
        .filter(order_item::Column::ProductId.eq(product))
        .all(&*ctx.db)
        .await
        .unwrap()
    {
        let parent = order::Entity::find_by_id(line.order_id)
            .one(&*ctx.db)
            .await
            .unwrap()
            .unwrap();
        if parent.status.holds_stock() {
            in_orders += line.quantity;
        }
    }

    in_carts + in_orders
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_never_oversell() {
    let ctx = TestContext::new().await;
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 6).await;

    let tasks = (0..15).map(|_| {
        let cart = ctx.services.cart.clone();
        tokio::spawn(async move { cart.add_item(Uuid::new_v4(), mug, 1).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let succeeded = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(succeeded, 6);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| matches!(err, ServiceError::InsufficientStock(_))));
    assert_eq!(ctx.available(mug).await, 0);
    assert_eq!(committed_units(&ctx, mug).await, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_to_one_cart_stay_consistent() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 50).await;
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();

    let tasks = (1..=8).map(|quantity| {
        let cart = ctx.services.cart.clone();
        tokio::spawn(async move { cart.update_item(user, mug, quantity).await })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    let cart = ctx.services.cart.get_cart(user).await.unwrap();
    let held = cart.total_units();
    assert!((1..=8).contains(&held));
    assert_eq!(ctx.available(mug).await, 50 - held);
}

#[tokio::test]
async fn stock_is_conserved_across_the_lifecycle() {
    let ctx = TestContext::new().await;
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 40).await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let conserved = |available: i32, committed: i32| available + committed == 40;

    ctx.services.cart.add_item(alice, mug, 5).await.unwrap();
    ctx.services.cart.add_item(bob, mug, 7).await.unwrap();
    ctx.services.cart.add_item(carol, mug, 3).await.unwrap();
    assert!(conserved(ctx.available(mug).await, committed_units(&ctx, mug).await));

    ctx.services.cart.update_item(bob, mug, 2).await.unwrap();
    let alice_order = ctx
        .services
        .checkout
        .checkout(alice, cod_checkout())
        .await
        .unwrap()
        .order;
    assert!(conserved(ctx.available(mug).await, committed_units(&ctx, mug).await));

    ctx.expire_cart(carol).await;
    ctx.services.cart.get_cart(carol).await.unwrap();
    assert!(conserved(ctx.available(mug).await, committed_units(&ctx, mug).await));

    ctx.services
        .order_status
        .update_status(OrderScope::Owner(alice), &alice_order.order_number, "Cancelled")
        .await
        .unwrap();
    ctx.services.cart.remove_item(bob, mug).await.unwrap();

    assert_eq!(ctx.available(mug).await, 40);
    assert_eq!(committed_units(&ctx, mug).await, 0);
}
