use crate::handlers::common::{success_response, validate_input, AuthenticatedUser};
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item).put(update_item))
        .route("/items/:product_id", delete(remove_item))
        .route("/coupon", post(apply_coupon))
}

/// Get the caller's cart
async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(success_response(cart))
}

/// Add item to cart
async fn add_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .add_item(user.user_id, payload.product_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Set a line's quantity; zero removes it
async fn update_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_item(user.user_id, payload.product_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove item from cart
async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, product_id)
        .await?;

    Ok(success_response(cart))
}

/// Clear the cart
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.clear_cart(user.user_id).await?;
    Ok(success_response(cart))
}

async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .apply_coupon(user.user_id, &payload.code)
        .await?;

    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code is required"))]
    pub code: String,
}
