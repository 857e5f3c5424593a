use crate::{
    entities::{order, order_item, payment},
    errors::ServiceError,
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Select,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Whose orders a caller may see and modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    /// Only orders placed by this user
    Owner(Uuid),
    Admin,
}

impl OrderScope {
    pub fn is_admin(&self) -> bool {
        matches!(self, OrderScope::Admin)
    }

    fn apply(&self, select: Select<order::Entity>) -> Select<order::Entity> {
        match self {
            OrderScope::Owner(user_id) => select.filter(order::Column::UserId.eq(*user_id)),
            OrderScope::Admin => select,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Order with its lines and payment.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: Option<payment::Model>,
}

/// Read side of orders: listing and detail lookups.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists orders newest first.
    ///
    /// `page` is 1-based and defaults to 1; `per_page` defaults to 10 and may
    /// not exceed 100.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        scope: OrderScope,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let per_page = per_page.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if per_page == 0 || per_page > MAX_PAGE_SIZE {
            return Err(ServiceError::ValidationError(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let paginator = scope
            .apply(order::Entity::find())
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, per_page);

        let counts = paginator.num_items_and_pages().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders,
            total: counts.number_of_items,
            page,
            per_page,
            total_pages: counts.number_of_pages,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        scope: OrderScope,
        order_number: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let order = find_order(&*self.db, scope, order_number).await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?;
        let payment = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }
}

/// Looks an order up by number within `scope`.
///
/// Orders owned by someone else are reported as not found.
pub async fn find_order<C>(
    conn: &C,
    scope: OrderScope,
    order_number: &str,
) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    scope
        .apply(order::Entity::find())
        .filter(order::Column::OrderNumber.eq(order_number))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
}
