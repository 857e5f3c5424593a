mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use checkout_engine::{
    db::{begin_transaction, with_transaction_retry},
    entities::{cart, order::OrderStatus, payment::PaymentMethod},
    errors::ServiceError,
    services::{
        commerce::{cart_store::HeaderUpdate, CartStore},
        order_status::write_status,
        orders::{find_order, OrderScope},
        payments::{ChargeOutcome, ChargeRequest, PaymentGateway, PaymentGateways},
    },
};
use chrono::Utc;
use common::{cod_checkout, test_settings, TestContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, DatabaseConnection, EntityTrait};
use serde_json::Value;
use uuid::Uuid;

#[tokio::test]
async fn stale_cart_header_write_is_a_conflict() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();

    let store = CartStore::new(ctx.settings.cart_ttl);
    let mut stale = store.find_by_user(&*ctx.db, user).await.unwrap().unwrap();
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();

    let now = Utc::now();
    let result = store
        .write_header(
            &*ctx.db,
            &mut stale,
            HeaderUpdate::reset(store.fresh_expiry(now)),
            now,
        )
        .await;

    assert_matches!(result, Err(ServiceError::TransactionConflict(_)));
    let row = ctx.cart_row(user).await;
    assert_eq!(row.version, stale.cart.version + 1);
    assert!(row.total > Decimal::ZERO);
}

#[tokio::test]
async fn stale_cart_attempt_succeeds_on_retry() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();

    let store = CartStore::new(ctx.settings.cart_ttl);
    let mut snapshot = store.find_by_user(&*ctx.db, user).await.unwrap();
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();

    let mut attempts = 0u32;
    let version = with_transaction_retry(&ctx.settings.retry, "cart.reset", || {
        attempts += 1;
        // Only the first attempt reuses the outdated snapshot.
        let stale = snapshot.take();
        let store = store.clone();
        let db = ctx.db.clone();
        async move {
            let txn = begin_transaction(&db).await?;
            let mut loaded = match stale {
                Some(loaded) => loaded,
                None => store.find_by_user(&txn, user).await?.unwrap(),
            };
            let now = Utc::now();
            store
                .write_header(
                    &txn,
                    &mut loaded,
                    HeaderUpdate::reset(store.fresh_expiry(now)),
                    now,
                )
                .await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(loaded.cart.version)
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts, 2);
    let row = ctx.cart_row(user).await;
    assert_eq!(row.version, version);
    assert_eq!(row.total, dec!(0));
}

#[tokio::test]
async fn stale_order_status_write_is_a_conflict() {
    let ctx = TestContext::new().await;
    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 1).await.unwrap();
    let order = ctx
        .services
        .checkout
        .checkout(user, cod_checkout())
        .await
        .unwrap()
        .order;

    let stale = find_order(&*ctx.db, OrderScope::Admin, &order.order_number)
        .await
        .unwrap();
    ctx.services
        .order_status
        .update_status(OrderScope::Admin, &order.order_number, "Shipped")
        .await
        .unwrap();

    let result = write_status(&*ctx.db, &stale, OrderStatus::Cancelled, Utc::now()).await;
    assert_matches!(result, Err(ServiceError::TransactionConflict(_)));

    // A fresh read sees the new version and goes through.
    let current = find_order(&*ctx.db, OrderScope::Admin, &order.order_number)
        .await
        .unwrap();
    assert_eq!(current.status, OrderStatus::Shipped);
    let delivered = write_status(&*ctx.db, &current, OrderStatus::Delivered, Utc::now())
        .await
        .unwrap();
    assert_eq!(delivered.version, stale.version + 2);
}

/// Approves every charge. The first charge also bumps the cart version from
/// another task and then stalls past the attempt timeout, so checkout retries
/// against a newer cart.
#[derive(Default)]
struct StallingGateway {
    db: OnceLock<Arc<DatabaseConnection>>,
    keys: Mutex<Vec<String>>,
    settled: Mutex<Vec<String>>,
    voided: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentGateway for StallingGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cod
    }

    fn validate_details(&self, _details: &Value) -> Result<(), ServiceError> {
        Ok(())
    }

    fn masked_details(&self, details: &Value) -> Value {
        details.clone()
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        let first = {
            let mut keys = self.keys.lock().unwrap();
            keys.push(request.idempotency_key.clone());
            keys.len() == 1
        };
        if first {
            let db = self.db.get().cloned().unwrap();
            tokio::spawn(async move {
                cart::Entity::update_many()
                    .col_expr(
                        cart::Column::Version,
                        Expr::col(cart::Column::Version).add(1),
                    )
                    .exec(&*db)
                    .await
                    .unwrap();
            });
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(ChargeOutcome::Approved {
            transaction_ref: format!("STALL-{}", request.idempotency_key),
        })
    }

    async fn settle(&self, idempotency_key: &str) {
        self.settled
            .lock()
            .unwrap()
            .push(idempotency_key.to_string());
    }

    async fn void(&self, idempotency_key: &str) {
        self.voided.lock().unwrap().push(idempotency_key.to_string());
    }
}

#[tokio::test]
async fn retried_checkout_charges_under_one_key() {
    let gateway = Arc::new(StallingGateway::default());
    let mut settings = test_settings();
    settings.retry.attempt_timeout = Duration::from_millis(300);
    let ctx = TestContext::with_gateways(
        settings,
        PaymentGateways::default().register(gateway.clone()),
    )
    .await;
    assert!(gateway.db.set(ctx.db.clone()).is_ok());

    let user = Uuid::new_v4();
    let mug = ctx.seed_product("Mug", dec!(5.00), dec!(0), 10).await;
    ctx.services.cart.add_item(user, mug, 2).await.unwrap();
    let version_before = ctx.cart_row(user).await.version;

    let receipt = ctx
        .services
        .checkout
        .checkout(user, cod_checkout())
        .await
        .unwrap();

    let keys = gateway.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1]);
    assert_eq!(*gateway.settled.lock().unwrap(), vec![keys[0].clone()]);
    assert!(gateway.voided.lock().unwrap().is_empty());
    assert_eq!(
        receipt.payment.transaction_ref,
        Some(format!("STALL-{}", keys[0]))
    );
    assert_eq!(ctx.order_count().await, 1);
    assert_eq!(ctx.metrics.retry_count("checkout"), 1);
    // The concurrent bump landed before the retry; checkout wrote on top of it.
    assert_eq!(ctx.cart_row(user).await.version, version_before + 2);
}

#[tokio::test]
async fn failed_checkout_voids_its_authorization() {
    let gateway = Arc::new(StallingGateway::default());
    let ctx = TestContext::with_gateways(
        test_settings(),
        PaymentGateways::default().register(gateway.clone()),
    )
    .await;
    let user = Uuid::new_v4();

    let result = ctx.services.checkout.checkout(user, cod_checkout()).await;

    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    assert!(gateway.keys.lock().unwrap().is_empty());
    assert!(gateway.settled.lock().unwrap().is_empty());
    assert_eq!(gateway.voided.lock().unwrap().len(), 1);
}
