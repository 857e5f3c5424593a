use crate::{
    config::CommerceSettings,
    db::{begin_transaction, with_transaction_retry},
    entities::{cart, cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::CommerceMetrics,
    services::commerce::{
        cart_expiry::{CartExpiryReconciler, ExpiredCart},
        cart_store::{CartStore, HeaderUpdate, LoadedCart},
        coupons::{normalize_code, CouponResolver},
        pricing_service::{round_money, PricedLine, TotalsCalculator},
    },
    services::inventory::{InventoryLedger, Reservation},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Query, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Shopping cart service: the cart operations coordinator.
///
/// Every operation is one storage transaction that reads the user's cart,
/// reconciles expiry, applies its change to the cart lines and the inventory
/// ledger, recomputes the cached totals and commits. Transient conflicts re-run
/// the whole transaction; domain errors abort it with nothing written.
///
/// # Examples
///
/// ```ignore
/// let carts = CartService::new(db, event_sender, metrics, coupons, settings);
///
/// let view = carts.add_item(user_id, product_id, 2).await?;
/// let view = carts.apply_coupon(user_id, "DISCOUNT10").await?;
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    metrics: Arc<dyn CommerceMetrics>,
    coupons: Arc<dyn CouponResolver>,
    store: CartStore,
    expiry: CartExpiryReconciler,
    ledger: InventoryLedger,
    calculator: TotalsCalculator,
    settings: CommerceSettings,
}

/// Cart snapshot returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    /// Coupon share of `total_discount`
    pub coupon_discount: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl CartView {
    pub fn item(&self, product_id: Uuid) -> Option<&CartLineView> {
        self.items.iter().find(|line| line.product_id == product_id)
    }

    pub fn total_units(&self) -> i32 {
        self.items.iter().map(|line| line.quantity).sum()
    }
}

/// One cart line with drift flags against the live catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    /// Price when the line was added
    pub price: Decimal,
    /// Discount percent when the line was added
    pub discount_percent: Decimal,
    pub current_price: Decimal,
    pub current_discount_percent: Decimal,
    pub price_changed: bool,
    pub discount_changed: bool,
    pub line_total: Decimal,
}

/// Coupon handling for the header write at the end of an operation.
enum CouponChange {
    Keep,
    Set { code: String, amount: Decimal },
    Clear,
}

/// Committed result of one attempt plus what to publish afterwards.
struct CartOutcome {
    view: CartView,
    expired: Option<ExpiredCart>,
    event: Option<Event>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        metrics: Arc<dyn CommerceMetrics>,
        coupons: Arc<dyn CouponResolver>,
        settings: CommerceSettings,
    ) -> Self {
        let store = CartStore::new(settings.cart_ttl);
        let ledger = InventoryLedger::new();
        Self {
            db,
            event_sender,
            metrics,
            coupons,
            expiry: CartExpiryReconciler::new(store.clone(), ledger),
            store,
            ledger,
            calculator: TotalsCalculator::new(settings.tax_rate),
            settings,
        }
    }

    /// Creates the user's cart if it does not exist yet.
    ///
    /// Called at registration time; every other operation also creates the
    /// cart lazily, so calling this is optional.
    #[instrument(skip(self))]
    pub async fn ensure_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        self.run("cart.ensure", || async {
            let txn = begin_transaction(&self.db).await?;
            let loaded = self.store.load_or_create(&txn, user_id, Utc::now()).await?;
            txn.commit().await?;
            Ok(loaded.cart)
        })
        .await
    }

    /// Returns the user's cart after expiry reconciliation and pruning of lines
    /// whose product is no longer purchasable.
    ///
    /// Does not extend the cart's expiry.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let outcome = self
            .run("cart.get", || async {
                let now = Utc::now();
                let txn = begin_transaction(&self.db).await?;
                let (mut loaded, expired) = self.open(&txn, user_id, now).await?;
                let expires_at = loaded.cart.expires_at;

                let view = self
                    .persist(&txn, &mut loaded, CouponChange::Keep, expires_at, now)
                    .await?;
                txn.commit().await?;

                Ok(CartOutcome {
                    view,
                    expired,
                    event: None,
                })
            })
            .await?;

        Ok(self.publish(user_id, "cart.get", outcome).await)
    }

    /// Adds `quantity` units of a product, reserving them from stock.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - quantity outside 1..=max
    /// * `NotFound` / `ProductUnavailable` - product missing, inactive or deleted
    /// * `InsufficientStock` - available stock below the new line quantity, or a
    ///   concurrent reservation took the last units first
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        self.validate_quantity(quantity, 1)?;

        let outcome = self
            .run("cart.add_item", || {
                self.add_item_attempt(user_id, product_id, quantity)
            })
            .await?;

        info!(%user_id, %product_id, quantity, "Added item to cart");
        Ok(self.publish(user_id, "cart.add_item", outcome).await)
    }

    async fn add_item_attempt(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartOutcome, ServiceError> {
        let now = Utc::now();
        let txn = begin_transaction(&self.db).await?;
        let (mut loaded, expired) = self.open(&txn, user_id, now).await?;

        let product = self.purchasable_product(&txn, product_id).await?;

        let existing = loaded.item(product_id).map(|item| item.quantity).unwrap_or(0);
        let new_quantity = existing + quantity;
        if new_quantity > self.settings.max_item_quantity {
            return Err(ServiceError::ValidationError(format!(
                "A cart line may hold at most {} units; requested {}",
                self.settings.max_item_quantity, new_quantity
            )));
        }
        if product.available_quantity < new_quantity {
            return Err(insufficient_stock(&product, 0, new_quantity));
        }

        if self.ledger.reserve(&txn, product_id, quantity).await? == Reservation::Insufficient {
            return Err(insufficient_stock(&product, 0, new_quantity));
        }

        match loaded.item_index(product_id) {
            Some(idx) => {
                self.store
                    .set_item_quantity(&txn, &mut loaded, idx, new_quantity, now)
                    .await?
            }
            None => {
                self.store
                    .insert_item(&txn, &mut loaded, &product, new_quantity, now)
                    .await?
            }
        }

        let view = self
            .persist(
                &txn,
                &mut loaded,
                CouponChange::Keep,
                self.store.fresh_expiry(now),
                now,
            )
            .await?;
        txn.commit().await?;

        Ok(CartOutcome {
            view,
            expired,
            event: Some(Event::CartItemAdded {
                user_id,
                product_id,
                quantity,
            }),
        })
    }

    /// Sets a line to `new_quantity`, reserving or releasing the difference.
    ///
    /// A quantity of zero removes the line and releases everything it held.
    /// Increases need the product to still be purchasable; decreases do not.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        new_quantity: i32,
    ) -> Result<CartView, ServiceError> {
        self.validate_quantity(new_quantity, 0)?;

        let outcome = self
            .run("cart.update_item", || {
                self.update_item_attempt(user_id, product_id, new_quantity)
            })
            .await?;

        info!(%user_id, %product_id, new_quantity, "Updated cart item");
        Ok(self.publish(user_id, "cart.update_item", outcome).await)
    }

    async fn update_item_attempt(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        new_quantity: i32,
    ) -> Result<CartOutcome, ServiceError> {
        let now = Utc::now();
        let txn = begin_transaction(&self.db).await?;
        let (mut loaded, expired) = self.open(&txn, user_id, now).await?;

        let idx = loaded
            .item_index(product_id)
            .ok_or_else(|| not_in_cart(product_id))?;
        let previous = loaded.items[idx].quantity;

        if new_quantity == 0 {
            let removed = self.store.remove_item(&txn, &mut loaded, idx).await?;
            self.ledger
                .release(&txn, removed.product_id, removed.quantity)
                .await?;
        } else {
            let delta = new_quantity - previous;
            if delta > 0 {
                let product = self.purchasable_product(&txn, product_id).await?;
                if self.ledger.reserve(&txn, product_id, delta).await? == Reservation::Insufficient
                {
                    return Err(insufficient_stock(&product, previous, new_quantity));
                }
            } else if delta < 0 {
                self.ledger.release(&txn, product_id, -delta).await?;
            }
            if delta != 0 {
                self.store
                    .set_item_quantity(&txn, &mut loaded, idx, new_quantity, now)
                    .await?;
            }
        }

        let view = self
            .persist(
                &txn,
                &mut loaded,
                CouponChange::Keep,
                self.store.fresh_expiry(now),
                now,
            )
            .await?;
        txn.commit().await?;

        Ok(CartOutcome {
            view,
            expired,
            event: Some(Event::CartItemUpdated {
                user_id,
                product_id,
                old_quantity: previous,
                new_quantity,
            }),
        })
    }

    /// Removes a line and releases its full quantity.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let outcome = self
            .run("cart.remove_item", || async {
                let now = Utc::now();
                let txn = begin_transaction(&self.db).await?;
                let (mut loaded, expired) = self.open(&txn, user_id, now).await?;

                let idx = loaded
                    .item_index(product_id)
                    .ok_or_else(|| not_in_cart(product_id))?;
                let removed = self.store.remove_item(&txn, &mut loaded, idx).await?;
                self.ledger
                    .release(&txn, removed.product_id, removed.quantity)
                    .await?;

                let view = self
                    .persist(
                        &txn,
                        &mut loaded,
                        CouponChange::Keep,
                        self.store.fresh_expiry(now),
                        now,
                    )
                    .await?;
                txn.commit().await?;

                Ok(CartOutcome {
                    view,
                    expired,
                    event: Some(Event::CartItemRemoved {
                        user_id,
                        product_id,
                        released: removed.quantity,
                    }),
                })
            })
            .await?;

        info!(%user_id, %product_id, "Removed item from cart");
        Ok(self.publish(user_id, "cart.remove_item", outcome).await)
    }

    /// Releases every line, empties the cart, clears the coupon and resets expiry.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let outcome = self
            .run("cart.clear", || async {
                let now = Utc::now();
                let txn = begin_transaction(&self.db).await?;
                let (mut loaded, expired) = self.open(&txn, user_id, now).await?;

                let removed = self.store.remove_all_items(&txn, &mut loaded).await?;
                for item in &removed {
                    self.ledger
                        .release(&txn, item.product_id, item.quantity)
                        .await?;
                }

                let view = self
                    .persist(
                        &txn,
                        &mut loaded,
                        CouponChange::Clear,
                        self.store.fresh_expiry(now),
                        now,
                    )
                    .await?;
                txn.commit().await?;

                Ok(CartOutcome {
                    view,
                    expired,
                    event: Some(Event::CartCleared {
                        user_id,
                        released: removed.iter().map(|item| item.quantity).sum(),
                    }),
                })
            })
            .await?;

        info!(%user_id, "Cleared cart");
        Ok(self.publish(user_id, "cart.clear", outcome).await)
    }

    /// Resolves `code` against the current subtotal and stores the resulting amount.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<CartView, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }

        let outcome = self
            .run("cart.apply_coupon", || {
                self.apply_coupon_attempt(user_id, code.clone())
            })
            .await?;

        info!(%user_id, %code, "Applied coupon");
        Ok(self.publish(user_id, "cart.apply_coupon", outcome).await)
    }

    async fn apply_coupon_attempt(
        &self,
        user_id: Uuid,
        code: String,
    ) -> Result<CartOutcome, ServiceError> {
        let now = Utc::now();
        let txn = begin_transaction(&self.db).await?;
        let (mut loaded, expired) = self.open(&txn, user_id, now).await?;

        let products = self.prepare(&txn, &mut loaded).await?;
        let subtotal = round_money(self.calculator.subtotal(&priced_lines(&loaded)));
        let amount = self.coupons.resolve(&code, subtotal).await?;

        let view = self
            .finalize(
                &txn,
                &mut loaded,
                &products,
                CouponChange::Set {
                    code: code.clone(),
                    amount,
                },
                self.store.fresh_expiry(now),
                now,
            )
            .await?;
        txn.commit().await?;

        Ok(CartOutcome {
            view,
            expired,
            event: Some(Event::CouponApplied {
                user_id,
                code,
                discount: amount,
            }),
        })
    }

    /// Reconciles carts whose expiry has passed while they still hold lines.
    ///
    /// Each cart is handled in its own retryable transaction; a failure on one
    /// cart is logged and does not stop the sweep. Returns the number of carts reset.
    #[instrument(skip(self))]
    pub async fn sweep_expired_carts(&self, limit: u64) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let candidates: Vec<(Uuid, Uuid)> = cart::Entity::find()
            .select_only()
            .column(cart::Column::Id)
            .column(cart::Column::UserId)
            .filter(cart::Column::ExpiresAt.lt(now))
            .filter(
                cart::Column::Id.in_subquery(
                    Query::select()
                        .column(cart_item::Column::CartId)
                        .from(cart_item::Entity)
                        .to_owned(),
                ),
            )
            .limit(limit)
            .into_tuple()
            .all(&*self.db)
            .await?;

        let mut reset = 0;
        for (cart_id, user_id) in candidates {
            let result = self
                .run("cart.sweep", || async {
                    let now = Utc::now();
                    let txn = begin_transaction(&self.db).await?;
                    let Some(mut loaded) = self.store.find_by_id(&txn, cart_id).await? else {
                        return Ok(None);
                    };
                    let expired = self.expiry.reconcile(&txn, &mut loaded, now).await?;
                    txn.commit().await?;
                    Ok(expired)
                })
                .await;

            match result {
                Ok(Some(expired)) => {
                    reset += 1;
                    self.record_expiry(user_id, expired).await;
                }
                Ok(None) => {}
                Err(e) => warn!(%cart_id, error = %e, "Failed to reconcile expired cart"),
            }
        }

        if reset > 0 {
            info!(reset, "Expired carts reconciled");
        }
        Ok(reset)
    }

    /// Loads or creates the cart and runs expiry reconciliation.
    async fn open(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(LoadedCart, Option<ExpiredCart>), ServiceError> {
        let mut loaded = self.store.load_or_create(txn, user_id, now).await?;
        let expired = self.expiry.reconcile(txn, &mut loaded, now).await?;
        Ok((loaded, expired))
    }

    async fn purchasable_product(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.is_purchasable() {
            return Err(ServiceError::ProductUnavailable(format!(
                "{} is not available for purchase",
                product.name
            )));
        }
        Ok(product)
    }

    /// Loads live products and prunes lines that are no longer purchasable.
    async fn prepare<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let products = self.store.live_products(conn, &loaded.items).await?;
        let dropped = self
            .store
            .prune_unavailable(conn, loaded, &products)
            .await?;
        if !dropped.is_empty() {
            warn!(
                cart_id = %loaded.cart.id,
                dropped = dropped.len(),
                "Dropped cart lines for unavailable products"
            );
        }
        Ok(products)
    }

    /// Recomputes totals from the remaining lines and writes the cart header.
    async fn finalize<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        products: &HashMap<Uuid, product::Model>,
        coupon: CouponChange,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CartView, ServiceError>
    where
        C: ConnectionTrait,
    {
        let (coupon_code, coupon_discount) = match coupon {
            CouponChange::Keep => (
                loaded.cart.coupon_code.clone(),
                loaded.cart.coupon_discount,
            ),
            CouponChange::Set { code, amount } => (Some(code), amount),
            CouponChange::Clear => (None, Decimal::ZERO),
        };

        let totals = self
            .calculator
            .calculate(&priced_lines(loaded), coupon_discount);

        self.store
            .write_header(
                conn,
                loaded,
                HeaderUpdate {
                    totals,
                    coupon_code,
                    coupon_discount,
                    expires_at,
                },
                now,
            )
            .await?;

        Ok(build_view(loaded, products, totals.coupon_discount))
    }

    async fn persist<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        coupon: CouponChange,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CartView, ServiceError>
    where
        C: ConnectionTrait,
    {
        let products = self.prepare(conn, loaded).await?;
        self.finalize(conn, loaded, &products, coupon, expires_at, now)
            .await
    }

    /// Retry wrapper that also reports re-run attempts to the metrics sink.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempts = 0u32;
        let metrics = &self.metrics;
        with_transaction_retry(&self.settings.retry, operation, || {
            attempts += 1;
            if attempts > 1 {
                metrics.record_retry(operation);
            }
            attempt()
        })
        .await
    }

    /// Post-commit bookkeeping: metrics and events.
    async fn publish(&self, user_id: Uuid, operation: &'static str, outcome: CartOutcome) -> CartView {
        if let Some(expired) = outcome.expired {
            self.record_expiry(user_id, expired).await;
        }
        if let Some(event) = outcome.event {
            self.event_sender.send_or_log(event).await;
        }
        self.metrics.record_operation(operation);
        self.metrics.record_cart_size(outcome.view.items.len());
        outcome.view
    }

    async fn record_expiry(&self, user_id: Uuid, expired: ExpiredCart) {
        if expired.released_lines > 0 {
            self.metrics.record_abandonment();
        }
        self.event_sender
            .send_or_log(Event::CartExpired {
                user_id,
                released: expired.released_units,
                expired_at: expired.expired_at,
            })
            .await;
    }

    fn validate_quantity(&self, quantity: i32, min: i32) -> Result<(), ServiceError> {
        let max = self.settings.max_item_quantity;
        if quantity < min || quantity > max {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between {} and {}",
                min, max
            )));
        }
        Ok(())
    }
}

fn priced_lines(loaded: &LoadedCart) -> Vec<PricedLine> {
    loaded
        .items
        .iter()
        .map(|item| PricedLine {
            price: item.price,
            quantity: item.quantity,
            discount_percent: item.discount_percent,
        })
        .collect()
}

fn build_view(
    loaded: &LoadedCart,
    products: &HashMap<Uuid, product::Model>,
    applied_coupon: Decimal,
) -> CartView {
    let items = loaded
        .items
        .iter()
        .map(|item| {
            let live = products.get(&item.product_id);
            let current_price = live.map(|p| p.price).unwrap_or(item.price);
            let current_discount = live
                .map(|p| p.discount_percent)
                .unwrap_or(item.discount_percent);
            let line = PricedLine {
                price: item.price,
                quantity: item.quantity,
                discount_percent: item.discount_percent,
            };
            CartLineView {
                product_id: item.product_id,
                name: live.map(|p| p.name.clone()).unwrap_or_default(),
                quantity: item.quantity,
                price: item.price,
                discount_percent: item.discount_percent,
                current_price,
                current_discount_percent: current_discount,
                price_changed: current_price != item.price,
                discount_changed: current_discount != item.discount_percent,
                line_total: round_money(line.line_total()),
            }
        })
        .collect();

    let cart = &loaded.cart;
    CartView {
        cart_id: cart.id,
        user_id: cart.user_id,
        items,
        subtotal: cart.subtotal,
        total_discount: cart.total_discount,
        tax: cart.tax,
        total: cart.total,
        coupon_code: cart.coupon_code.clone(),
        coupon_discount: applied_coupon,
        expires_at: cart.expires_at,
    }
}

/// `held` counts units the line already reserved toward `requested`.
fn insufficient_stock(product: &product::Model, held: i32, requested: i32) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "Insufficient stock for {}. Available: {}, Requested: {}",
        product.name,
        product.available_quantity + held,
        requested
    ))
}

fn not_in_cart(product_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
}
