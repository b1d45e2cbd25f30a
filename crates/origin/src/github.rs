use axum::http::HeaderMap;

use crate::{
    Error, GITHUB_SIGNATURE, GITHUB_SIGNATURE_256, WebhookOrigin, header_value, hmac_sha1_hex,
    hmac_sha256_hex, secure_eq,
};

pub struct GitHubValidator;

impl WebhookOrigin for GitHubValidator {
    fn extract_event_type(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    fn validate_signature(
        &self,
        headers: &HeaderMap,
        secret: &str,
        body: Option<&[u8]>,
    ) -> Result<(), Error> {
        let body = body.ok_or(Error::MissingRawBody)?;

        let (expected_signature, signature) = match header_value(headers, GITHUB_SIGNATURE_256)? {
            Some(signature) => {
                let expected_signature = format!("sha256={}", hmac_sha256_hex(secret, body)?);
                (expected_signature, signature)
            }
            None => {
                // Legacy deliveries only carry the SHA-1 digest.
                let signature = header_value(headers, GITHUB_SIGNATURE)?
                    .ok_or(Error::NoSignatureHeader)?;
                let expected_signature = format!("sha1={}", hmac_sha1_hex(secret, body)?);
                (expected_signature, signature)
            }
        };

        if !secure_eq(signature, &expected_signature) {
            return Err(Error::InvalidSignature);
        }

        Ok(())
    }
}
