// =============================================================================
// Gateway error taxonomy — one enum, one HTTP envelope
// =============================================================================
//
// Every fallible operation that crosses the HTTP boundary returns a
// `GatewayError`. Handlers that only talk to internal subsystems (ingestion,
// fan-out, lifecycle) use `anyhow::Result` and translate at the API edge,
// matching the split already present in the upstream client glue code.
// =============================================================================

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InputException(String),

    #[error("{0}")]
    AuthorizationException(String),

    #[error("{0}")]
    DataNotFound(String),

    #[error("{0}")]
    TickerException(String),

    #[error("{0}")]
    DatabaseException(String),

    #[error("{0}")]
    ServerException(String),
}

impl GatewayError {
    fn error_type(&self) -> &'static str {
        match self {
            Self::InputException(_) => "InputException",
            Self::AuthorizationException(_) => "AuthorizationException",
            Self::DataNotFound(_) => "DataNotFound",
            Self::TickerException(_) => "TickerException",
            Self::DatabaseException(_) => "DatabaseException",
            Self::ServerException(_) => "ServerException",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InputException(_) => StatusCode::BAD_REQUEST,
            Self::AuthorizationException(_) => StatusCode::UNAUTHORIZED,
            Self::DataNotFound(_) => StatusCode::NOT_FOUND,
            Self::TickerException(_) | Self::DatabaseException(_) | Self::ServerException(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error_type: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorEnvelope {
            status: "error",
            error_type: self.error_type(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Wraps a successful payload in the `{status:"success", data}` envelope
/// specified for every non-SSE, non-streaming response.
#[derive(Serialize)]
pub struct SuccessEnvelope<T: Serialize> {
    status: &'static str,
    data: T,
}

pub fn success<T: Serialize>(data: T) -> Json<SuccessEnvelope<T>> {
    Json(SuccessEnvelope {
        status: "success",
        data,
    })
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseException(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
