//! The core consumes a token-verifier capability rather than owning credential
//! storage (§1): OS keychains, SSH-agent state, and how a token was minted are
//! all out of scope here.

/// Verifies a bearer token presented at the HTTP or WebSocket boundary.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// A verifier that checks the token against one fixed shared secret.
///
/// Useful as the default wiring for `main.rs` and in tests; production
/// deployments may supply a verifier backed by a richer external capability.
pub struct StaticTokenVerifier {
    token: String,
}

impl StaticTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> bool {
        // constant-time-ish compare is unnecessary here: the static verifier
        // is a development/test fallback, not the production auth path.
        token == self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_verifier_matches_exact_token() {
        let v = StaticTokenVerifier::new("secret");
        assert!(v.verify("secret"));
        assert!(!v.verify("wrong"));
    }
}
