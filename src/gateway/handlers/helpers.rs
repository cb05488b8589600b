//! Handler helpers shared by every route

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::super::types::ApiError;
use crate::core_types::UserId;

/// Header carrying the identity established by the upstream auth layer
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Authenticated caller, read from [`USER_ID_HEADER`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;

        match raw.trim().parse::<UserId>() {
            Ok(user_id) if user_id > 0 => Ok(Caller(user_id)),
            _ => Err(ApiError::bad_request(format!("Invalid {} format", USER_ID_HEADER))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(value: Option<&str>) -> Result<Caller, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = value {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_extraction() {
        assert_eq!(extract(Some("42")).await.unwrap(), Caller(42));
        assert_eq!(extract(None).await.unwrap_err().status.as_u16(), 401);
        assert_eq!(extract(Some("abc")).await.unwrap_err().status.as_u16(), 400);
        assert_eq!(extract(Some("0")).await.unwrap_err().status.as_u16(), 400);
    }
}
