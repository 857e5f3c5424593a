use crate::errors::ServiceError;
use crate::services::orders::OrderScope;
use crate::ApiResponse;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role; `admin` grants admin scope.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T, message: &str) -> Response {
    (
        StatusCode::CREATED,
        Json(ApiResponse::success(data).with_message(message)),
    )
        .into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Caller identity extracted from the auth headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl AuthenticatedUser {
    /// Scope for order lookups made on the caller's own behalf.
    pub fn own_scope(&self) -> OrderScope {
        OrderScope::Owner(self.user_id)
    }

    /// Admin scope, or `Unauthorized` for regular users.
    pub fn admin_scope(&self) -> Result<OrderScope, ServiceError> {
        if self.is_admin {
            Ok(OrderScope::Admin)
        } else {
            Err(ServiceError::Unauthorized(
                "Admin role required".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing or invalid user id".to_string())
            })?;

        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|role| role.trim().eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Self { user_id, is_admin })
    }
}
