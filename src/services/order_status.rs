use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder,
};
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_transaction, with_transaction_retry, RetryConfig},
    entities::{
        order::{self, OrderStatus},
        order_item, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::CommerceMetrics,
    services::inventory::{InventoryLedger, Reservation},
    services::orders::{find_order, OrderScope},
};

/// Order status machine.
///
/// Entering `Paid` reserves stock for every line; cancelling an order that
/// holds stock releases it. Each transition is one retryable transaction.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    metrics: Arc<dyn CommerceMetrics>,
    ledger: InventoryLedger,
    retry: RetryConfig,
}

struct Transition {
    order: order::Model,
    from: OrderStatus,
    changed: bool,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        metrics: Arc<dyn CommerceMetrics>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            metrics,
            ledger: InventoryLedger::new(),
            retry,
        }
    }

    /// Moves an order to `new_status`.
    ///
    /// `new_status` must be one of the six status names exactly as displayed.
    /// Owners may only cancel their own orders; every other target needs admin
    /// scope. Requesting the current status succeeds without side effects.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        scope: OrderScope,
        order_number: &str,
        new_status: &str,
    ) -> Result<order::Model, ServiceError> {
        let target: OrderStatus = new_status
            .parse()
            .map_err(ServiceError::ValidationError)?;

        if !scope.is_admin() && target != OrderStatus::Cancelled {
            return Err(ServiceError::Unauthorized(format!(
                "Only administrators can set status '{}'",
                target
            )));
        }

        let mut attempts = 0u32;
        let transition = with_transaction_retry(&self.retry, "order.update_status", || {
            attempts += 1;
            if attempts > 1 {
                self.metrics.record_retry("order.update_status");
            }
            self.transition_attempt(scope, order_number, target)
        })
        .await?;

        self.metrics.record_operation("order.update_status");
        if transition.changed {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: transition.order.id,
                    old_status: transition.from.to_string(),
                    new_status: target.to_string(),
                })
                .await;
            info!(
                order_number,
                from = %transition.from,
                to = %target,
                "Order status updated"
            );
        }

        Ok(transition.order)
    }

    async fn transition_attempt(
        &self,
        scope: OrderScope,
        order_number: &str,
        target: OrderStatus,
    ) -> Result<Transition, ServiceError> {
        let now = Utc::now();
        let txn = begin_transaction(&self.db).await?;

        let current = find_order(&txn, scope, order_number).await?;
        let from = current.status;

        if from == target {
            txn.commit().await?;
            return Ok(Transition {
                order: current,
                from,
                changed: false,
            });
        }

        if !is_valid_transition(from, target) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition order {} from '{}' to '{}'",
                order_number, from, target
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(current.id))
            .order_by_asc(order_item::Column::Position)
            .all(&txn)
            .await?;

        if target == OrderStatus::Paid && !from.holds_stock() {
            self.reserve_lines(&txn, &items).await?;
        }
        if target == OrderStatus::Cancelled && from.holds_stock() {
            for item in &items {
                self.ledger
                    .release(&txn, item.product_id, item.quantity)
                    .await?;
            }
        }

        let order = write_status(&txn, &current, target, now).await?;
        txn.commit().await?;

        Ok(Transition {
            order,
            from,
            changed: true,
        })
    }

    async fn reserve_lines(
        &self,
        txn: &DatabaseTransaction,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        for item in items {
            if self
                .ledger
                .reserve(txn, item.product_id, item.quantity)
                .await?
                == Reservation::Insufficient
            {
                let product = product::Entity::find_by_id(item.product_id)
                    .one(txn)
                    .await?;
                warn!(product_id = %item.product_id, "Stock short while marking order paid");
                return Err(match product {
                    Some(product) => ServiceError::InsufficientStock(format!(
                        "Insufficient stock for {}. Available: {}, Requested: {}",
                        product.name, product.available_quantity, item.quantity
                    )),
                    None => ServiceError::ProductUnavailable(format!(
                        "Product {} no longer exists",
                        item.product_id
                    )),
                });
            }
        }
        Ok(())
    }
}

/// Stores `target` on the order if its version is still `current.version`.
///
/// A lost race surfaces as `TransactionConflict` and writes nothing.
pub async fn write_status<C>(
    conn: &C,
    current: &order::Model,
    target: OrderStatus,
    now: DateTime<Utc>,
) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let next_version = current.version + 1;
    let result = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(target.as_str()))
        .col_expr(order::Column::Version, Expr::value(next_version))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(current.id))
        .filter(order::Column::Version.eq(current.version))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(ServiceError::TransactionConflict(format!(
            "order {} was modified concurrently",
            current.order_number
        )));
    }

    Ok(order::Model {
        status: target,
        version: next_version,
        updated_at: now,
        ..current.clone()
    })
}

/// Allowed moves between distinct statuses.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (PendingPayment, AwaitingPayment)
            | (PendingPayment, Paid)
            | (PendingPayment, Cancelled)
            | (AwaitingPayment, Paid)
            | (AwaitingPayment, Cancelled)
            | (Paid, Shipped)
            | (Paid, Cancelled)
            | (Shipped, Delivered)
            | (Shipped, Cancelled)
    )
}
