use super::{Error, GITLAB_TOKEN, WebhookOrigin, header_value, secure_eq};
use axum::http::HeaderMap;

pub struct GitLabValidator;

impl WebhookOrigin for GitLabValidator {
    fn extract_event_type(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get("X-Gitlab-Event")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    /// GitLab sends the shared secret itself, the body is not signed.
    fn validate_signature(
        &self,
        headers: &HeaderMap,
        secret: &str,
        _body: Option<&[u8]>,
    ) -> Result<(), Error> {
        let token = header_value(headers, GITLAB_TOKEN)
            .map_err(|_| Error::InvalidToken)?
            .ok_or(Error::NoSignatureHeader)?;

        if !secure_eq(token, secret) {
            return Err(Error::InvalidToken);
        }

        Ok(())
    }
}
