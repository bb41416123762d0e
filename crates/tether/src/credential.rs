//! Opaque credentials threaded through every request.
//!
//! A credential is supplied by whoever owns identity (a login prompt, a token
//! store) and handed to the session explicitly. Nothing in this crate reads
//! credentials from global state.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Authorization scheme a credential is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

/// An opaque authorization value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    scheme: AuthScheme,
    value: String,
}

impl Credential {
    /// Bearer token, sent as-is.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            value: token.into(),
        }
    }

    /// HTTP basic credential, stored base64-encoded.
    pub fn basic(username: &str, password: &str) -> Self {
        Self {
            scheme: AuthScheme::Basic,
            value: STANDARD.encode(format!("{username}:{password}")),
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// Raw encoded value, without the scheme prefix.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Full `Authorization` header value.
    pub fn header_value(&self) -> String {
        match self.scheme {
            AuthScheme::Basic => format!("Basic {}", self.value),
            AuthScheme::Bearer => format!("Bearer {}", self.value),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Who a session is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub credential: Credential,
}

impl Identity {
    pub fn new(username: impl Into<String>, credential: Credential) -> Self {
        Self {
            username: username.into(),
            credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credential_is_encoded() {
        let credential = Credential::basic("alice", "secret");
        assert_eq!(credential.value(), "YWxpY2U6c2VjcmV0");
        assert_eq!(credential.header_value(), "Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn test_bearer_header_value() {
        let credential = Credential::bearer("tok-1");
        assert_eq!(credential.scheme(), AuthScheme::Bearer);
        assert_eq!(credential.header_value(), "Bearer tok-1");
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let rendered = format!("{:?}", Credential::bearer("super-secret"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }
}
