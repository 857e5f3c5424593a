#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use checkout_engine::{
    app_router,
    config::{AppConfig, CommerceSettings},
    db::{self, RetryConfig},
    entities::{cart, order, product},
    events::{Event, EventSender},
    handlers::AppServices,
    metrics::{CommerceMetrics, InMemoryMetrics},
    services::{
        commerce::{CheckoutInput, ShippingAddress, StaticCouponResolver},
        payments::PaymentGateways,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Events observed by the test harness, in emission order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

/// Services wired against a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub metrics: Arc<InMemoryMetrics>,
    pub events: EventLog,
    pub config: AppConfig,
    pub settings: CommerceSettings,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: CommerceSettings) -> Self {
        Self::with_gateways(settings, PaymentGateways::default()).await
    }

    pub async fn with_gateways(settings: CommerceSettings, gateways: PaymentGateways) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every pooled connection to `sqlite::memory:` is its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let events = EventLog::default();
        let sink = events.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                sink.0.lock().unwrap().push(event);
            }
        });

        let metrics = Arc::new(InMemoryMetrics::new());
        let services = AppServices::new(
            db.clone(),
            Arc::new(EventSender::new(event_tx)),
            metrics.clone() as Arc<dyn CommerceMetrics>,
            Arc::new(StaticCouponResolver::default()),
            gateways,
            settings.clone(),
        );

        Self {
            db,
            services,
            metrics,
            events,
            config: cfg,
            settings,
        }
    }

    pub fn router(&self) -> Router {
        app_router(Arc::new(AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            services: self.services.clone(),
            metrics: self.metrics.clone(),
        }))
    }

    /// Inserts an active product.
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        discount_percent: Decimal,
        available: i32,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price: Set(price),
            discount_percent: Set(discount_percent),
            available_quantity: Set(available),
            status: Set(product::ProductStatus::Active),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn available(&self, id: Uuid) -> i32 {
        self.product(id).await.available_quantity
    }

    pub async fn set_status(&self, id: Uuid, status: product::ProductStatus) {
        let mut active: product::ActiveModel = self.product(id).await.into();
        active.status = Set(status);
        active.update(&*self.db).await.expect("set status");
    }

    pub async fn set_price(&self, id: Uuid, price: Decimal) {
        let mut active: product::ActiveModel = self.product(id).await.into();
        active.price = Set(price);
        active.update(&*self.db).await.expect("set price");
    }

    /// Moves the user's cart expiry into the past.
    pub async fn expire_cart(&self, user_id: Uuid) {
        cart::Entity::update_many()
            .col_expr(
                cart::Column::ExpiresAt,
                Expr::value(Utc::now() - ChronoDuration::days(1)),
            )
            .filter(cart::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await
            .expect("expire cart");
    }

    pub async fn cart_row(&self, user_id: Uuid) -> cart::Model {
        cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("load cart")
            .expect("cart exists")
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.db)
            .await
            .expect("count orders")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user: Option<(Uuid, bool)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, is_admin)) = user {
            builder = builder.header("x-user-id", user_id.to_string());
            if is_admin {
                builder = builder.header("x-user-role", "admin");
            }
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("build request"),
            None => builder.body(Body::empty()).expect("build request"),
        };

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }
}

pub fn test_settings() -> CommerceSettings {
    CommerceSettings {
        retry: RetryConfig {
            max_attempts: 5,
            backoff: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(30),
        },
        ..CommerceSettings::default()
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        street: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        country: "US".to_string(),
    }
}

pub fn cod_checkout() -> CheckoutInput {
    serde_json::from_value(json!({
        "paymentMethod": "COD",
        "paymentDetails": { "confirmation": true },
        "shippingAddress": address(),
    }))
    .expect("checkout input")
}

pub fn card_checkout(number: &str) -> CheckoutInput {
    serde_json::from_value(json!({
        "paymentMethod": "Card",
        "paymentDetails": { "cardNumber": number, "expiry": "12/30", "cvc": "123" },
        "shippingAddress": address(),
    }))
    .expect("checkout input")
}
