use thiserror::Error;

/// Reasons a webhook delivery fails authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Request body is missing or not in expected format")]
    MissingRawBody,
    #[error("No signature header provided")]
    NoSignatureHeader,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid token")]
    InvalidToken,
}

/// Terminal problems found while normalizing a webhook payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Branch reference (ref) not found in request body")]
    MissingBranchRef,
    #[error("Project name not found in request body")]
    MissingProjectName,
}
