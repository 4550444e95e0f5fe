/*
 * Responsibility
 * - アプリ共通の AppError 定義
 * - IntoResponse 実装 (HTTP status / JSON error body)
 * - scope / exchange / discovery の各 service error を統一的に変換
 */
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::discovery::DiscoveryError;
use crate::services::exchange::ExchangeError;
use crate::services::scopes::ScopeError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("no scope mapping for path: {path}")]
    RouteNotMapped { path: String },

    #[error("identity provider rejected the exchange: {message}")]
    ExchangeRejected { message: String },

    #[error("identity provider unavailable: {message}")]
    IdentityProvider { message: String },

    #[error("service discovery failed: {message}")]
    Discovery { message: String },

    #[error("no healthy upstream instances")]
    NoHealthyUpstream,

    #[error("upstream unavailable: {message}")]
    Upstream { message: String },

    #[error("internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "unauthorized".to_string(),
            ),
            AppError::RouteNotMapped { path } => (
                StatusCode::NOT_FOUND,
                "ROUTE_NOT_MAPPED",
                format!("no scope mapping for path: {path}"),
            ),
            AppError::ExchangeRejected { message } => {
                (StatusCode::UNAUTHORIZED, "EXCHANGE_REJECTED", message)
            }
            AppError::IdentityProvider { message } => {
                (StatusCode::BAD_GATEWAY, "IDENTITY_PROVIDER", message)
            }
            AppError::Discovery { message } => {
                (StatusCode::SERVICE_UNAVAILABLE, "DISCOVERY", message)
            }
            AppError::NoHealthyUpstream => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_HEALTHY_UPSTREAM",
                "no healthy upstream instances".to_string(),
            ),
            AppError::Upstream { message } => (StatusCode::BAD_GATEWAY, "UPSTREAM", message),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "internal server error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ScopeError> for AppError {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::Unmapped { path } => AppError::RouteNotMapped { path },
        }
    }
}

impl From<ExchangeError> for AppError {
    fn from(e: ExchangeError) -> Self {
        match e {
            // Provider said the assertion (or consent) is no good: the caller's problem.
            ExchangeError::Rejected { .. } => AppError::ExchangeRejected {
                message: e.to_string(),
            },
            // Transport failure or deadline: the provider's problem.
            ExchangeError::Provider(_) | ExchangeError::Timeout(_) => AppError::IdentityProvider {
                message: e.to_string(),
            },
        }
    }
}

impl From<DiscoveryError> for AppError {
    fn from(e: DiscoveryError) -> Self {
        AppError::Discovery {
            message: e.to_string(),
        }
    }
}
