use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 43-character URL-safe string (32 random bytes → base64url, 256 bits).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_token()
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a cryptographically random state parameter for `OAuth2`.
///
/// Same construction as the verifier, drawn independently.
#[must_use]
pub fn generate_state() -> String {
    random_token()
}

/// Generates an opaque session identifier for the session cookie.
#[must_use]
pub fn generate_session_id() -> String {
    random_token()
}

fn random_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 43);
        assert_eq!(URL_SAFE_NO_PAD.decode(&verifier).unwrap().len(), 32);
    }

    #[test]
    fn test_code_verifier_url_safe() {
        let verifier = generate_code_verifier();
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {verifier}"
        );
    }

    #[test]
    fn test_code_challenge_deterministic() {
        let verifier = generate_code_verifier();
        let c1 = generate_code_challenge(&verifier);
        let c2 = generate_code_challenge(&verifier);
        assert_eq!(c1, c2, "challenge should be deterministic");
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // RFC 7636 Appendix B
        let challenge = generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_code_challenge_different_for_different_verifiers() {
        let c1 = generate_code_challenge("verifier_1");
        let c2 = generate_code_challenge("verifier_2");
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_state_length() {
        let state = generate_state();
        assert_eq!(state.len(), 43);
    }

    #[test]
    fn test_states_do_not_collide() {
        let states: HashSet<String> = (0..1000).map(|_| generate_state()).collect();
        assert_eq!(states.len(), 1000);
    }

    #[test]
    fn test_state_differs_from_verifier() {
        let verifier = generate_code_verifier();
        let state = generate_state();
        assert_ne!(state, verifier);
    }
}
