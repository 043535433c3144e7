use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Which dimension of a subscription's monthly allowance rejected an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Count,
    Value,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::Count => write!(f, "count"),
            QuotaKind::Value => write!(f, "value"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("monthly pre-order {kind} limit exceeded")]
    QuotaExceeded { kind: QuotaKind },
    #[error("pre-order quantity exceeds available product capacity")]
    CapacityExceeded,
    #[error("pre-order window is closed")]
    WindowClosed,
    #[error("customer already has an active subscription")]
    DuplicateActive,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("refund failed: {0}")]
    RefundFailed(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) | AppError::DuplicateActive => StatusCode::CONFLICT,
            AppError::QuotaExceeded { .. } | AppError::CapacityExceeded | AppError::WindowClosed => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::RefundFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
