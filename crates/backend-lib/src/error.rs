// crates/backend-lib/src/error.rs

//! Central error types + Axum integration.
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use repogate_common::REALM;
use thiserror::Error;

/// Failures raised by the authentication core
///
/// `Clone` so one owner's failure can be delivered to every coalesced follower.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed credential hash: {0}")]
    Format(String),

    #[error("Argon2 execution failed: {0}")]
    Hash(String),

    #[error("Encoded credential failed self-verification")]
    SelfVerification,

    #[error("Reservation of {requested} bytes can never fit under the ceiling of {ceiling} bytes")]
    Capacity { requested: u64, ceiling: u64 },

    #[error("Interrupted while waiting for memory budget")]
    Interrupted,

    #[error("Verification owner exited without publishing a result")]
    Abandoned,

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Entropy source failure: {0}")]
    Entropy(String),
}

impl AuthError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Format(_) => "CRED_001",
            AuthError::Hash(_) => "CRED_002",
            AuthError::SelfVerification => "CRED_003",
            AuthError::Capacity { .. } => "CAP_001",
            AuthError::Interrupted => "CAP_002",
            AuthError::Abandoned => "AUTH_004",
            AuthError::UnknownHost(_) => "HOST_001",
            AuthError::Entropy(_) => "INT_002",
        }
    }

    /// Whether the failure comes from load rather than from bad data
    pub fn is_overload(&self) -> bool {
        matches!(self, AuthError::Capacity { .. } | AuthError::Interrupted)
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Hash(err.to_string())
    }
}

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad credentials, unknown user or host, or a taint override. Deliberately a single case.
    #[error("Authentication failed")]
    Unauthorized,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Auth(err) if err.is_overload() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "AUTH_001",
            AppError::Auth(err) => err.error_code(),
            AppError::Settings(_) => "CFG_001",
            AppError::Internal(_) => "INT_001",
            AppError::Io(_) => "IO_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Auth(err) if err.is_overload() => {
                "Server busy, please try again later".to_string()
            },
            _ => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Basic realm=\"{REALM}\", charset=\"UTF-8\"");
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Settings(err.to_string())
    }
}
