#![allow(clippy::missing_errors_doc)]

use std::fmt;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;

pub use crate::errors::{Error, PayloadError};
pub use crate::payload::{EventKind, NormalizedEvent, UNKNOWN};

mod errors;
mod gitea;
mod github;
mod gitlab;
pub mod payload;

pub const GITHUB_SIGNATURE_256: &str = "X-Hub-Signature-256";
pub const GITHUB_SIGNATURE: &str = "X-Hub-Signature";
pub const GITLAB_TOKEN: &str = "X-Gitlab-Token";
pub const GITEA_SIGNATURE: &str = "X-Gitea-Signature";

/// Git hosting providers able to deliver webhooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Origin {
    GitHub,
    GitLab,
    Gitea,
}

pub trait WebhookOrigin {
    fn extract_event_type(&self, headers: &HeaderMap) -> Option<String>;
    fn validate_signature(
        &self,
        headers: &HeaderMap,
        secret: &str,
        body: Option<&[u8]>,
    ) -> Result<(), Error>;
}

impl Origin {
    /// Detects the sender from the authentication header it attached.
    ///
    /// A GitLab token wins over a Gitea signature, which wins over GitHub's
    /// signature headers.
    pub fn detect(headers: &HeaderMap) -> Option<Self> {
        if headers.contains_key(GITLAB_TOKEN) {
            Some(Origin::GitLab)
        } else if headers.contains_key(GITEA_SIGNATURE) {
            Some(Origin::Gitea)
        } else if headers.contains_key(GITHUB_SIGNATURE_256) || headers.contains_key(GITHUB_SIGNATURE)
        {
            Some(Origin::GitHub)
        } else {
            None
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::GitHub => f.write_str("GitHub"),
            Origin::GitLab => f.write_str("GitLab"),
            Origin::Gitea => f.write_str("Gitea"),
        }
    }
}

impl WebhookOrigin for Origin {
    fn extract_event_type(&self, headers: &HeaderMap) -> Option<String> {
        match self {
            Origin::GitHub => github::GitHubValidator.extract_event_type(headers),
            Origin::GitLab => gitlab::GitLabValidator.extract_event_type(headers),
            Origin::Gitea => gitea::GiteaValidator.extract_event_type(headers),
        }
    }

    fn validate_signature(
        &self,
        headers: &HeaderMap,
        secret: &str,
        body: Option<&[u8]>,
    ) -> Result<(), Error> {
        match self {
            Origin::GitHub => github::GitHubValidator.validate_signature(headers, secret, body),
            Origin::GitLab => gitlab::GitLabValidator.validate_signature(headers, secret, body),
            Origin::Gitea => gitea::GiteaValidator.validate_signature(headers, secret, body),
        }
    }
}

/// Outcome of authenticating a single webhook delivery.
#[derive(Debug)]
pub struct SignatureVerification {
    pub is_authentic: bool,
    pub origin: Option<Origin>,
    pub failure: Option<Error>,
}

impl SignatureVerification {
    pub fn failure_reason(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }

    /// Provider name for logs, `Unknown` when no signature header was found.
    pub fn provider(&self) -> String {
        self.origin
            .map_or_else(|| "Unknown".to_string(), |origin| origin.to_string())
    }
}

/// Authenticates `body` against `secret` using the scheme of whichever
/// provider the headers identify.
pub fn verify(headers: &HeaderMap, secret: &str, body: Option<&[u8]>) -> SignatureVerification {
    let Some(origin) = Origin::detect(headers) else {
        return SignatureVerification {
            is_authentic: false,
            origin: None,
            failure: Some(Error::NoSignatureHeader),
        };
    };

    match origin.validate_signature(headers, secret, body) {
        Ok(()) => SignatureVerification {
            is_authentic: true,
            origin: Some(origin),
            failure: None,
        },
        Err(error) => SignatureVerification {
            is_authentic: false,
            origin: Some(origin),
            failure: Some(error),
        },
    }
}

pub(crate) fn header_value<'h>(
    headers: &'h HeaderMap,
    name: &'static str,
) -> Result<Option<&'h str>, Error> {
    headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| Error::InvalidSignature))
        .transpose()
}

pub(crate) fn hmac_sha256_hex(secret: &str, body: &[u8]) -> Result<String, Error> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| Error::InvalidSignature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn hmac_sha1_hex(secret: &str, body: &[u8]) -> Result<String, Error> {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map_err(|_| Error::InvalidSignature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compares two secrets in constant time.
pub fn secure_eq(provided: &str, expected: &str) -> bool {
    constant_time_eq::constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
