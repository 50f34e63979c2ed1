//! Connection authentication
//!
//! A single bearer token gates every surface.  The token comes from
//! OPSGATE_AUTH_TOKEN, or is generated at startup and printed once so a
//! local operator can connect.  Possession of the token is what makes a
//! caller the administrator.

use rand::Rng;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthState {
    token: Option<Arc<String>>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("enabled", &self.token.is_some())
            .finish()
    }
}

impl AuthState {
    /// Build from the environment.  OPSGATE_AUTH_DISABLED=1 turns auth off
    /// entirely (local development only).
    pub fn from_env() -> Self {
        if std::env::var("OPSGATE_AUTH_DISABLED").as_deref() == Ok("1") {
            tracing::warn!("authentication disabled");
            return Self { token: None };
        }

        let token = match std::env::var("OPSGATE_AUTH_TOKEN") {
            Ok(token) if !token.is_empty() => token,
            _ => {
                let generated = generate_token();
                tracing::info!("generated auth token: {generated}");
                generated
            }
        };
        Self {
            token: Some(Arc::new(token)),
        }
    }

    pub fn disabled() -> Self {
        Self { token: None }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(Arc::new(token.into())),
        }
    }

    /// Whether a token is actually being checked.
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check a presented token.  Always true when auth is disabled.
    pub fn verify(&self, candidate: Option<&str>) -> bool {
        match (&self.token, candidate) {
            (None, _) => true,
            (Some(expected), Some(candidate)) => constant_time_eq(expected, candidate),
            (Some(_), None) => false,
        }
    }
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = AuthState::disabled();
        assert!(auth.verify(None));
        assert!(auth.verify(Some("whatever")));
    }

    #[test]
    fn token_auth_requires_exact_match() {
        let auth = AuthState::with_token("secret-token");
        assert!(auth.verify(Some("secret-token")));
        assert!(!auth.verify(Some("secret-tokeN")));
        assert!(!auth.verify(Some("secret")));
        assert!(!auth.verify(None));
    }

    #[test]
    fn generated_tokens_are_hex_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
