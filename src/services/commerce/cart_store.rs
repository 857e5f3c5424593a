use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{cart, cart_item, product};
use crate::errors::ServiceError;
use crate::services::commerce::pricing_service::CartTotals;

/// A cart row together with its lines, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCart {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl LoadedCart {
    pub fn item_index(&self, product_id: Uuid) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.product_id == product_id)
    }

    pub fn item(&self, product_id: Uuid) -> Option<&cart_item::Model> {
        self.item_index(product_id).map(|idx| &self.items[idx])
    }

    pub fn next_position(&self) -> i32 {
        self.items
            .iter()
            .map(|item| item.position + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Header fields rewritten by every cart operation.
#[derive(Debug, Clone)]
pub struct HeaderUpdate {
    pub totals: CartTotals,
    pub coupon_code: Option<String>,
    /// Amount computed when the coupon was applied
    pub coupon_discount: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl HeaderUpdate {
    /// Empty, coupon-free cart expiring at `expires_at`.
    pub fn reset(expires_at: DateTime<Utc>) -> Self {
        Self {
            totals: CartTotals::default(),
            coupon_code: None,
            coupon_discount: Decimal::ZERO,
            expires_at,
        }
    }
}

/// Row-level persistence for carts and cart lines.
///
/// Every method runs against the caller's connection, normally the open
/// transaction of the operation in progress.
#[derive(Debug, Clone)]
pub struct CartStore {
    ttl: Duration,
}

impl CartStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn fresh_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }

    pub async fn find_by_user<C>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<LoadedCart>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?;

        match cart {
            Some(cart) => {
                let items = self.items_for(conn, cart.id).await?;
                Ok(Some(LoadedCart { cart, items }))
            }
            None => Ok(None),
        }
    }

    pub async fn find_by_id<C>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Option<LoadedCart>, ServiceError>
    where
        C: ConnectionTrait,
    {
        match cart::Entity::find_by_id(cart_id).one(conn).await? {
            Some(cart) => {
                let items = self.items_for(conn, cart.id).await?;
                Ok(Some(LoadedCart { cart, items }))
            }
            None => Ok(None),
        }
    }

    /// Returns the user's cart, creating an empty one on first access.
    ///
    /// Two first accesses racing each other trip the unique key on `user_id`;
    /// the loser's transaction is retried and finds the winner's row.
    pub async fn load_or_create<C>(
        &self,
        conn: &C,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LoadedCart, ServiceError>
    where
        C: ConnectionTrait,
    {
        if let Some(loaded) = self.find_by_user(conn, user_id).await? {
            return Ok(loaded);
        }

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            subtotal: Set(Decimal::ZERO),
            total_discount: Set(Decimal::ZERO),
            tax: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            coupon_code: Set(None),
            coupon_discount: Set(Decimal::ZERO),
            expires_at: Set(self.fresh_expiry(now)),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        info!(cart_id = %cart.id, %user_id, "Created cart");
        Ok(LoadedCart {
            cart,
            items: Vec::new(),
        })
    }

    async fn items_for<C>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .all(conn)
            .await?)
    }

    /// Adds a line, snapshotting the product's current price and discount.
    pub async fn insert_item<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        product: &product::Model,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(loaded.cart.id),
            product_id: Set(product.id),
            quantity: Set(quantity),
            price: Set(product.price),
            discount_percent: Set(product.discount_percent),
            position: Set(loaded.next_position()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        loaded.items.push(item);
        Ok(())
    }

    pub async fn set_item_quantity<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        idx: usize,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut active: cart_item::ActiveModel = loaded.items[idx].clone().into();
        active.quantity = Set(quantity);
        active.updated_at = Set(now);
        loaded.items[idx] = active.update(conn).await?;
        Ok(())
    }

    pub async fn remove_item<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        idx: usize,
    ) -> Result<cart_item::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        let item = loaded.items.remove(idx);
        cart_item::Entity::delete_by_id(item.id).exec(conn).await?;
        Ok(item)
    }

    pub async fn remove_all_items<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
    ) -> Result<Vec<cart_item::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(loaded.cart.id))
            .exec(conn)
            .await?;
        Ok(std::mem::take(&mut loaded.items))
    }

    /// Current catalog rows for every product referenced by the cart.
    pub async fn live_products<C>(
        &self,
        conn: &C,
        items: &[cart_item::Model],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(conn)
            .await?;

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Drops lines whose product vanished, was deactivated or soft-deleted.
    ///
    /// No stock is released for these lines.
    pub async fn prune_unavailable<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        products: &HashMap<Uuid, product::Model>,
    ) -> Result<Vec<cart_item::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let (keep, dropped): (Vec<_>, Vec<_>) =
            std::mem::take(&mut loaded.items)
                .into_iter()
                .partition(|item| {
                    products
                        .get(&item.product_id)
                        .map(|p| p.is_purchasable())
                        .unwrap_or(false)
                });
        loaded.items = keep;

        if !dropped.is_empty() {
            let ids: Vec<Uuid> = dropped.iter().map(|item| item.id).collect();
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::Id.is_in(ids))
                .exec(conn)
                .await?;
            debug!(
                cart_id = %loaded.cart.id,
                dropped = dropped.len(),
                "Removed lines for unavailable products"
            );
        }
        Ok(dropped)
    }

    /// Rewrites the cached header, guarded by the row version.
    ///
    /// A version mismatch means another transaction committed a change to this
    /// cart after it was read, and surfaces as a retryable conflict.
    pub async fn write_header<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        update: HeaderUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let current = &loaded.cart;
        let next_version = current.version + 1;

        let result = cart::Entity::update_many()
            .col_expr(cart::Column::Subtotal, Expr::value(update.totals.subtotal))
            .col_expr(
                cart::Column::TotalDiscount,
                Expr::value(update.totals.total_discount),
            )
            .col_expr(cart::Column::Tax, Expr::value(update.totals.tax))
            .col_expr(cart::Column::Total, Expr::value(update.totals.total))
            .col_expr(
                cart::Column::CouponCode,
                Expr::value(update.coupon_code.clone()),
            )
            .col_expr(
                cart::Column::CouponDiscount,
                Expr::value(update.coupon_discount),
            )
            .col_expr(cart::Column::ExpiresAt, Expr::value(update.expires_at))
            .col_expr(cart::Column::Version, Expr::value(next_version))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(current.id))
            .filter(cart::Column::Version.eq(current.version))
            .exec(conn)
            .await?;

        if result.rows_affected != 1 {
            return Err(ServiceError::TransactionConflict(format!(
                "cart {} was modified concurrently",
                current.id
            )));
        }

        loaded.cart = cart::Model {
            subtotal: update.totals.subtotal,
            total_discount: update.totals.total_discount,
            tax: update.totals.tax,
            total: update.totals.total,
            coupon_code: update.coupon_code,
            coupon_discount: update.coupon_discount,
            expires_at: update.expires_at,
            version: next_version,
            updated_at: now,
            ..loaded.cart.clone()
        };
        Ok(())
    }
}
