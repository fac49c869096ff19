//! Basic Authentication Gate
//!
//! Single-user HTTP basic auth used by the embedded metrics endpoint
//! and the webhook provider. Requests without an exact username and
//! password match are answered with `401` and a `Basic` challenge.

use std::fmt;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use tracing::debug;

use crate::config::{AuthConfig, BasicAuthConfig};

/// Challenge sent with every `401` response.
pub const CHALLENGE: &str = r#"Basic realm="Restricted""#;

/// Configured username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl From<&BasicAuthConfig> for BasicCredentials {
    fn from(config: &BasicAuthConfig) -> Self {
        Self::new(&config.username, &config.password)
    }
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials from an optional auth section.
    pub fn from_auth(auth: Option<&AuthConfig>) -> Option<Self> {
        auth.and_then(AuthConfig::basic).map(Self::from)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Exact match of both username and password.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }

    /// Check an `Authorization` header value against these credentials.
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        header
            .and_then(|value| value.to_str().ok())
            .and_then(decode_basic)
            .is_some_and(|(user, pass)| self.matches(&user, &pass))
    }

    /// `Authorization` header value for outbound requests.
    pub fn header_value(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

/// Decode a `Basic <base64(user:pass)>` header into its parts.
pub fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Axum middleware enforcing basic auth.
///
/// Install with `middleware::from_fn_with_state(Arc::new(credentials), require_basic_auth)`.
pub async fn require_basic_auth(
    State(credentials): State<Arc<BasicCredentials>>,
    request: Request,
    next: Next,
) -> Response {
    if credentials.verify(request.headers().get(header::AUTHORIZATION)) {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "Rejected request with invalid credentials");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, CHALLENGE)],
        "invalid credentials",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_header_value_round_trips() {
        let creds = BasicCredentials::new("admin", "s3cr:et");
        let value = creds.header_value();
        assert_eq!(
            decode_basic(&value),
            Some(("admin".to_string(), "s3cr:et".to_string()))
        );
        assert!(creds.verify(Some(&header(&value))));
    }

    #[test]
    fn test_wrong_password_rejected() {
        let creds = BasicCredentials::new("admin", "secret");
        let other = BasicCredentials::new("admin", "Secret").header_value();
        assert!(!creds.verify(Some(&header(&other))));
    }

    #[test]
    fn test_missing_or_malformed_header_rejected() {
        let creds = BasicCredentials::new("admin", "secret");
        assert!(!creds.verify(None));
        assert!(!creds.verify(Some(&header("Bearer abc"))));
        assert!(!creds.verify(Some(&header("Basic !!!"))));
        // "admin" without a colon separator
        assert!(!creds.verify(Some(&header("Basic YWRtaW4="))));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let creds = BasicCredentials::new("admin", "secret");
        let value = creds.header_value().replacen("Basic", "basic", 1);
        assert!(creds.verify(Some(&header(&value))));
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = BasicCredentials::new("admin", "secret");
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
