use crate::handlers::common::{success_response, validate_input, AuthenticatedUser};
use crate::{errors::ServiceError, services::orders::OrderScope, AppState, PaginatedResponse};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Routes for the caller's own orders
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_own_orders))
        .route("/:order_number", get(get_own_order))
        .route("/:order_number/status", patch(update_own_order_status))
}

/// Routes over every user's orders; admin role required
pub fn admin_order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_all_orders))
        .route("/:order_number", get(get_any_order))
        .route("/:order_number/status", patch(update_any_order_status))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

async fn list_orders(
    state: &AppState,
    scope: OrderScope,
    query: ListOrdersQuery,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_orders(scope, query.page, query.limit)
        .await?;

    Ok(success_response(PaginatedResponse {
        items: page.orders,
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages: page.total_pages,
    }))
}

async fn list_own_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    list_orders(&state, user.own_scope(), query).await
}

async fn list_all_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    list_orders(&state, user.admin_scope()?, query).await
}

async fn get_own_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .orders
        .get_order(user.own_scope(), &order_number)
        .await?;
    Ok(success_response(details))
}

async fn get_any_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .orders
        .get_order(user.admin_scope()?, &order_number)
        .await?;
    Ok(success_response(details))
}

async fn update_status(
    state: &AppState,
    scope: OrderScope,
    order_number: &str,
    payload: UpdateStatusRequest,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .order_status
        .update_status(scope, order_number, &payload.status)
        .await?;
    Ok(success_response(order))
}

/// Owners may only cancel
async fn update_own_order_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    update_status(&state, user.own_scope(), &order_number, payload).await
}

async fn update_any_order_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    update_status(&state, user.admin_scope()?, &order_number, payload).await
}
