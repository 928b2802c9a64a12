use actix_web::HttpResponse;
use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Domain(e) => match e {
                DomainError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                DomainError::Forbidden => (StatusCode::FORBIDDEN, e.to_string()),
                DomainError::InsufficientStock { .. } => (StatusCode::CONFLICT, e.to_string()),
                DomainError::CartExpired => (StatusCode::GONE, e.to_string()),
                DomainError::PaymentFailed(_) => (StatusCode::PAYMENT_REQUIRED, e.to_string()),
                DomainError::FinalizationFailed { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Payment succeeded but order finalization encountered an error. \
                     Our team has been notified."
                        .to_string(),
                ),
                DomainError::InvalidSignature => (StatusCode::BAD_REQUEST, e.to_string()),
                DomainError::InvalidInput(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                DomainError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                }
            },
            AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        HttpResponse::build(status).json(serde_json::json!({ "error": message }))
    }
}
