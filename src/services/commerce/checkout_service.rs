use crate::{
    config::CommerceSettings,
    db::{begin_transaction, with_transaction_retry},
    entities::{
        order::{self, OrderStatus},
        order_item,
        payment::{self, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::CommerceMetrics,
    services::commerce::{
        cart_expiry::CartExpiryReconciler,
        cart_store::{CartStore, HeaderUpdate, LoadedCart},
    },
    services::inventory::InventoryLedger,
    services::payments::{ChargeOutcome, ChargeRequest, PaymentGateway, PaymentGateways},
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, Set};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Checkout service for converting carts to orders.
///
/// Stock for every cart line was reserved when the line was added, so checkout
/// converts those reservations into a paid order without touching the ledger.
/// Order, order lines, payment and the emptied cart are written in one
/// transaction; any failure leaves all of them untouched.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    metrics: Arc<dyn CommerceMetrics>,
    gateways: PaymentGateways,
    store: CartStore,
    expiry: CartExpiryReconciler,
    settings: CommerceSettings,
}

/// Structured shipping address; every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "zip is required"))]
    pub zip: String,
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
}

impl ShippingAddress {
    /// Copy with surrounding whitespace removed from every field.
    pub fn trimmed(&self) -> Self {
        Self {
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            zip: self.zip.trim().to_string(),
            country: self.country.trim().to_string(),
        }
    }
}

/// Checkout request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_details: Value,
    pub shipping_address: ShippingAddress,
}

/// Everything created by a successful checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: payment::Model,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        metrics: Arc<dyn CommerceMetrics>,
        gateways: PaymentGateways,
        settings: CommerceSettings,
    ) -> Self {
        let store = CartStore::new(settings.cart_ttl);
        Self {
            db,
            event_sender,
            metrics,
            gateways,
            expiry: CartExpiryReconciler::new(store.clone(), InventoryLedger::new()),
            store,
            settings,
        }
    }

    /// Converts the user's cart into a paid order.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - missing payment detail or address field
    /// * `InvalidOperation` - the cart is empty (or expired and was reset)
    /// * `ProductUnavailable` / `InsufficientStock` - a line no longer checks out
    /// * `PaymentFailed` - the gateway declined the charge
    ///
    /// Every attempt charges under the same idempotency key. The approval is
    /// settled after commit and voided when checkout fails for good.
    #[instrument(skip(self, input), fields(method = %input.payment_method))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let gateway = self.gateways.get(input.payment_method)?;
        gateway.validate_details(&input.payment_details)?;
        let address = input.shipping_address.trimmed();
        address.validate()?;

        let idempotency_key = format!("checkout:{}", Uuid::new_v4());
        let mut attempts = 0u32;
        let result = with_transaction_retry(&self.settings.retry, "checkout", || {
            attempts += 1;
            if attempts > 1 {
                self.metrics.record_retry("checkout");
            }
            self.checkout_attempt(user_id, gateway.as_ref(), &idempotency_key, &input, &address)
        })
        .await;

        let receipt = match result {
            Ok(receipt) => {
                gateway.settle(&idempotency_key).await;
                receipt
            }
            Err(err) => {
                gateway.void(&idempotency_key).await;
                return Err(err);
            }
        };

        self.event_sender
            .send_or_log(Event::OrderCreated(receipt.order.id))
            .await;
        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                payment_id: receipt.payment.id,
                order_id: receipt.order.id,
                amount: receipt.payment.amount,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                user_id,
                order_id: receipt.order.id,
                order_number: receipt.order.order_number.clone(),
            })
            .await;
        self.metrics.record_operation("checkout");

        info!(
            %user_id,
            order_number = %receipt.order.order_number,
            total = %receipt.order.total_amount,
            "Checkout completed"
        );
        Ok(receipt)
    }

    async fn checkout_attempt(
        &self,
        user_id: Uuid,
        gateway: &dyn PaymentGateway,
        idempotency_key: &str,
        input: &CheckoutInput,
        address: &ShippingAddress,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let now = Utc::now();
        let txn = begin_transaction(&self.db).await?;

        let mut loaded = self.store.load_or_create(&txn, user_id, now).await?;
        if self.expiry.reconcile(&txn, &mut loaded, now).await?.is_some() {
            warn!(%user_id, "Cart expired before checkout");
        }
        if loaded.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        self.verify_lines(&txn, &loaded).await?;

        let charge = ChargeRequest {
            idempotency_key: idempotency_key.to_string(),
            method: input.payment_method,
            amount: loaded.cart.total,
            details: input.payment_details.clone(),
        };
        let transaction_ref = match gateway.charge(&charge).await? {
            ChargeOutcome::Approved { transaction_ref } => transaction_ref,
            ChargeOutcome::Declined { reason } => {
                return Err(ServiceError::PaymentFailed(reason));
            }
        };

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(&self.settings.order_number_prefix, now)),
            user_id: Set(user_id),
            status: Set(OrderStatus::Paid),
            subtotal: Set(loaded.cart.subtotal),
            total_discount: Set(loaded.cart.total_discount),
            tax: Set(loaded.cart.tax),
            total_amount: Set(loaded.cart.total),
            coupon_code: Set(loaded.cart.coupon_code.clone()),
            payment_method: Set(input.payment_method),
            payment_id: Set(None),
            shipping_street: Set(address.street.clone()),
            shipping_city: Set(address.city.clone()),
            shipping_state: Set(address.state.clone()),
            shipping_zip: Set(address.zip.clone()),
            shipping_country: Set(address.country.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(loaded.items.len());
        for line in &loaded.items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price: Set(line.price),
                discount_percent: Set(line.discount_percent),
                position: Set(line.position),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            method: Set(input.payment_method),
            details: Set(gateway.masked_details(&input.payment_details)),
            status: Set(PaymentStatus::Completed),
            amount: Set(order.total_amount),
            transaction_ref: Set(Some(transaction_ref)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut linked: order::ActiveModel = order.into();
        linked.payment_id = Set(Some(payment.id));
        let order = linked.update(&txn).await?;

        self.store.remove_all_items(&txn, &mut loaded).await?;
        self.store
            .write_header(
                &txn,
                &mut loaded,
                HeaderUpdate::reset(self.store.fresh_expiry(now)),
                now,
            )
            .await?;

        txn.commit().await?;

        Ok(CheckoutReceipt {
            order,
            items,
            payment,
        })
    }

    /// Re-checks every line against the live catalog. Nothing is reserved here.
    async fn verify_lines(
        &self,
        txn: &DatabaseTransaction,
        loaded: &LoadedCart,
    ) -> Result<(), ServiceError> {
        let products = self.store.live_products(txn, &loaded.items).await?;

        for line in &loaded.items {
            let product = products.get(&line.product_id).ok_or_else(|| {
                ServiceError::ProductUnavailable(format!(
                    "Product {} no longer exists",
                    line.product_id
                ))
            })?;
            if !product.is_purchasable() {
                return Err(ServiceError::ProductUnavailable(format!(
                    "{} is not available for purchase",
                    product.name
                )));
            }
            // The line's own reservation is already deducted from live stock.
            let claimable = product.available_quantity + line.quantity;
            if claimable < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for {}. Available: {}, Requested: {}",
                    product.name, claimable, line.quantity
                )));
            }
        }
        Ok(())
    }
}

/// `{prefix}-{unix millis}-{4 hex digits}`
pub fn generate_order_number(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{:04X}",
        prefix,
        now.timestamp_millis(),
        rand::random::<u16>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: " 1 Main St ".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            country: "US".into(),
        }
    }

    #[test]
    fn order_numbers_carry_prefix_time_and_suffix() {
        let now = Utc::now();
        let number = generate_order_number("ORD", now);
        let parts: Vec<&str> = number.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trimmed_address_validates() {
        let trimmed = address().trimmed();
        assert_eq!(trimmed.street, "1 Main St");
        assert!(trimmed.validate().is_ok());
    }

    #[test]
    fn blank_address_field_fails_validation() {
        let blank = ShippingAddress {
            city: "   ".into(),
            ..address()
        };
        assert!(blank.trimmed().validate().is_err());
    }

    #[test]
    fn checkout_input_uses_camel_case() {
        let input: CheckoutInput = serde_json::from_value(json!({
            "paymentMethod": "COD",
            "paymentDetails": { "confirmation": true },
            "shippingAddress": {
                "street": "1 Main St",
                "city": "Springfield",
                "state": "IL",
                "zip": "62701",
                "country": "US"
            }
        }))
        .unwrap();

        assert_eq!(input.payment_method, PaymentMethod::Cod);
        assert_eq!(input.payment_details["confirmation"], json!(true));
    }
}
