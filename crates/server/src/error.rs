use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use accountlink_api::{ApiError, AuthError, ServiceError};

/// Unified API error type.
///
/// Produces `{"error": "<message>", "code": "<code>"}` JSON responses.
#[derive(Debug)]
pub struct ApiErr {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl ApiErr {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServiceError> for ApiErr {
    fn from(e: ServiceError) -> Self {
        if let ServiceError::Internal(ref detail) = e {
            tracing::error!("{detail}");
            return Self::internal("internal server error");
        }
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, ApiError::from(&e).error)
    }
}

impl From<AuthError> for ApiErr {
    fn from(e: AuthError) -> Self {
        match &e {
            AuthError::Storage(detail) => tracing::error!("{detail}"),
            other => tracing::info!(code = other.code(), "auth rejected: {other}"),
        }
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiError::from(&e);
        Self {
            status,
            message: body.error,
            code: Some(e.code()),
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let body = ApiError {
            error: self.message,
            code: self.code.map(str::to_string),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_their_status() {
        let err = ApiErr::from(AuthError::IdentityExists {
            provider: "google".into(),
            uid: "abc".into(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code, Some("identity_exists"));

        let err = ApiErr::from(AuthError::AuthenticationCancelled("blocked".into()));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = ApiErr::from(AuthError::Storage("begin signup: database is locked".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");

        let err = ApiErr::from(ServiceError::Internal("RNG failure".into()));
        assert_eq!(err.message, "internal server error");
    }
}
