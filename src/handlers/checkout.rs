use crate::handlers::common::{created_response, AuthenticatedUser};
use crate::{errors::ServiceError, services::commerce::CheckoutInput, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(checkout))
}

/// Convert the caller's cart into a paid order
async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state
        .services
        .checkout
        .checkout(user.user_id, payload)
        .await?;

    Ok(created_response(receipt, "Order placed"))
}
