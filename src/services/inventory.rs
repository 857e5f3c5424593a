//! Inventory ledger: the only writer of `products.available_quantity`.
//!
//! Both operations are a single `UPDATE` statement, so concurrent callers are
//! serialized by the row lock and a reservation can never read a stale count.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::entities::product;
use crate::errors::{is_check_violation, ServiceError};

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    /// Available quantity was below the request, or the product row is gone.
    Insufficient,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryLedger;

impl InventoryLedger {
    pub fn new() -> Self {
        Self
    }

    /// Decrements available stock by `quantity` only if at least `quantity` is available.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::InvariantViolation(format!(
                "reserve called with non-positive quantity {} for product {}",
                quantity, product_id
            )));
        }

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::AvailableQuantity,
                Expr::col(product::Column::AvailableQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::AvailableQuantity.gte(quantity))
            .exec(conn)
            .await
            .map_err(map_ledger_error)?;

        match result.rows_affected {
            1 => {
                debug!(%product_id, quantity, "Stock reserved");
                Ok(Reservation::Reserved)
            }
            0 => Ok(Reservation::Insufficient),
            n => Err(ServiceError::InvariantViolation(format!(
                "reserve touched {} rows for product {}",
                n, product_id
            ))),
        }
    }

    /// Returns `quantity` units to available stock.
    ///
    /// A vanished product is logged and skipped; there is nothing to restore to.
    #[instrument(skip(self, conn))]
    pub async fn release<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::InvariantViolation(format!(
                "release called with non-positive quantity {} for product {}",
                quantity, product_id
            )));
        }

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::AvailableQuantity,
                Expr::col(product::Column::AvailableQuantity).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await
            .map_err(map_ledger_error)?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "Released stock for a product that no longer exists");
        } else {
            debug!(%product_id, quantity, "Stock released");
        }
        Ok(())
    }
}

fn map_ledger_error(err: DbErr) -> ServiceError {
    if is_check_violation(&err) {
        error!("Stock constraint violated: {}", err);
        ServiceError::InvariantViolation(format!("stock constraint violated: {}", err))
    } else {
        ServiceError::DatabaseError(err)
    }
}
