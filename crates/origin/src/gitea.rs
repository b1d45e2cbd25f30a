use axum::http::HeaderMap;

use crate::{Error, GITEA_SIGNATURE, WebhookOrigin, header_value, hmac_sha256_hex, secure_eq};

pub struct GiteaValidator;

impl WebhookOrigin for GiteaValidator {
    fn extract_event_type(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get("X-Gitea-Event")
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
        let signature = header_value(headers, GITEA_SIGNATURE)?.ok_or(Error::NoSignatureHeader)?;

        // Gitea sends the bare hex digest, proxies in front of it sometimes
        // rewrite it into GitHub's `sha256=` form.
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected_signature = hmac_sha256_hex(secret, body)?;

        if !secure_eq(signature, &expected_signature) {
            return Err(Error::InvalidSignature);
        }

        Ok(())
    }
}
