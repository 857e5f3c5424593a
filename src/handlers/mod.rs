pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;

use crate::config::CommerceSettings;
use crate::events::EventSender;
use crate::metrics::CommerceMetrics;
use crate::services::{
    commerce::{CartService, CheckoutService, CouponResolver},
    order_status::OrderStatusService,
    orders::OrderService,
    payments::PaymentGateways,
};
use crate::AppState;
use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Services shared by every request handler.
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        metrics: Arc<dyn CommerceMetrics>,
        coupons: Arc<dyn CouponResolver>,
        gateways: PaymentGateways,
        settings: CommerceSettings,
    ) -> Self {
        let cart = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            metrics.clone(),
            coupons,
            settings.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            metrics.clone(),
            gateways,
            settings.clone(),
        ));
        let orders = Arc::new(OrderService::new(db.clone()));
        let order_status = Arc::new(OrderStatusService::new(
            db,
            event_sender,
            metrics,
            settings.retry,
        ));

        Self {
            cart,
            checkout,
            orders,
            order_status,
        }
    }
}

/// Every `/api/v1` route.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", carts::cart_routes())
        .nest("/checkout", checkout::checkout_routes())
        .nest("/orders", orders::order_routes())
        .nest("/admin/orders", orders::admin_order_routes())
}
