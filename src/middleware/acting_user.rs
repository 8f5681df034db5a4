use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header naming the user a request acts for. Authentication happens
/// upstream; this service trusts the gateway to set it.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user a request acts on behalf of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::InvalidInput(format!("missing {} header", USER_ID_HEADER)))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(ActingUser)
            .ok_or_else(|| AppError::InvalidInput(format!("{} must be a UUID", USER_ID_HEADER)))
    }
}
