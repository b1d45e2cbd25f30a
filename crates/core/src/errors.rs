use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Terminal outcomes of a dispatch, each mapped to one HTTP status.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Request body is missing or not in expected format.")]
    MissingRawBody,
    #[error("Server configuration error: {0}")]
    ServerMisconfigured(&'static str),
    #[error("{0}. Access denied.")]
    Verification(deployhook_origin::Error),
    #[error("Request body is not valid JSON.")]
    InvalidPayload,
    #[error("{0}.")]
    Payload(#[from] deployhook_origin::PayloadError),
    #[error("Script not found")]
    ScriptNotFound,
    #[error("Internal Server Error")]
    ScriptLookup(#[source] std::io::Error),
    #[error("Internal Server Error during remote script execution")]
    Execution { details: String, stdout: String },
    #[error("Access denied: incorrect or missing secret.")]
    Forbidden,
    #[error("{0}")]
    InvalidRequest(&'static str),
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::MissingRawBody
            | DispatchError::InvalidPayload
            | DispatchError::Payload(_)
            | DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::Verification(deployhook_origin::Error::MissingRawBody) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::Verification(_) => StatusCode::UNAUTHORIZED,
            DispatchError::Forbidden => StatusCode::FORBIDDEN,
            DispatchError::ScriptNotFound => StatusCode::NOT_FOUND,
            DispatchError::ServerMisconfigured(_)
            | DispatchError::ScriptLookup(_)
            | DispatchError::Execution { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            DispatchError::Execution { details, stdout } => json!({
                "error": self.to_string(),
                "details": details,
                "stdout": stdout,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
