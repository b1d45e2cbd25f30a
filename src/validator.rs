use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, header};
use deployhook_core::BranchFilter;
use url::form_urlencoded;

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub async fn read_body(body: Body) -> Option<Bytes> {
    match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            tracing::warn!("Failed to read request body: {error}");
            None
        }
    }
}

pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

/// The exact body bytes, provided the request declared JSON and sent any.
pub fn raw_json_body<'a>(headers: &HeaderMap, body: Option<&'a Bytes>) -> Option<&'a [u8]> {
    body.filter(|bytes| !bytes.is_empty() && is_json(headers))
        .map(|bytes| &bytes[..])
}

/// Builds the branch allowlist from `refs` query parameters.
///
/// Accepts `refs=main`, repeated `refs=main&refs=develop` and the bracketed
/// `refs[]=main` / `refs[0]=main` forms. An empty value still counts as an
/// entry, so `?refs=` lets no branch through.
pub fn allowed_refs(query: Option<&str>) -> BranchFilter {
    let Some(query) = query else {
        return BranchFilter::default();
    };

    BranchFilter::new(
        form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| {
                key == "refs" || (key.starts_with("refs[") && key.ends_with(']'))
            })
            .map(|(_, value)| value.into_owned()),
    )
}

/// Reads the `secret` field of a JSON or url-encoded form body.
pub fn extract_secret(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if is_json(headers) {
        return serde_json::from_slice::<serde_json::Value>(body)
            .ok()?
            .get("secret")?
            .as_str()
            .map(ToString::to_string);
    }

    form_urlencoded::parse(body)
        .find(|(key, _)| key == "secret")
        .map(|(_, value)| value.into_owned())
}

pub fn remote_addr(extensions: &Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn content_type(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn json_content_types() {
        assert!(is_json(&content_type("application/json")));
        assert!(is_json(&content_type("application/json; charset=utf-8")));
        assert!(is_json(&content_type("application/vnd.github+json")));
        assert!(!is_json(&content_type("application/x-www-form-urlencoded")));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn raw_body_requires_json_and_content() {
        let body = Bytes::from_static(b"{}");
        let empty = Bytes::new();

        assert!(raw_json_body(&content_type("application/json"), Some(&body)).is_some());
        assert!(raw_json_body(&content_type("application/json"), Some(&empty)).is_none());
        assert!(raw_json_body(&content_type("text/plain"), Some(&body)).is_none());
        assert!(raw_json_body(&content_type("application/json"), None).is_none());
    }

    #[test]
    fn refs_query_forms() {
        assert!(allowed_refs(None).allowed().is_empty());
        assert_eq!(allowed_refs(Some("refs=main")).allowed(), ["main"]);
        assert_eq!(
            allowed_refs(Some("refs=main&refs=develop")).allowed(),
            ["main", "develop"]
        );
        assert_eq!(
            allowed_refs(Some("refs%5B%5D=main&refs[]=feature%2Fx&other=1")).allowed(),
            ["main", "feature/x"]
        );
        assert_eq!(allowed_refs(Some("refs[0]=main&refs=")).allowed(), ["main", ""]);
        assert!(!allowed_refs(Some("refs=")).allows("main"));
    }

    #[test]
    fn secret_from_form_or_json() {
        assert_eq!(
            extract_secret(&content_type("application/x-www-form-urlencoded"), b"secret=a%20b").as_deref(),
            Some("a b")
        );
        assert_eq!(
            extract_secret(&content_type("application/json"), br#"{"secret":"abc"}"#).as_deref(),
            Some("abc")
        );
        assert_eq!(extract_secret(&content_type("application/json"), b"{}"), None);
    }
}
