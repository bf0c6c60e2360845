//! PKCE and OAuth redirect helpers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Local OAuth callback path (port is dynamic).
pub const LOCAL_CALLBACK_PATH: &str = "/auth/callback";

/// Verifier kept by the CLI and the S256 challenge sent to the provider.
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Fills `N` bytes from v4 UUIDs, whose payload comes from the OS RNG.
fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    for chunk in out.chunks_mut(16) {
        let id = uuid::Uuid::new_v4();
        chunk.copy_from_slice(&id.as_bytes()[..chunk.len()]);
    }
    out
}

pub fn generate_pkce() -> Pkce {
    let verifier = URL_SAFE_NO_PAD.encode(random_bytes::<32>());
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    Pkce {
        verifier,
        challenge,
    }
}

pub fn build_redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}{LOCAL_CALLBACK_PATH}")
}

/// Picks a port in the dynamic range (49152..=65535).
pub fn random_local_port() -> u16 {
    let [lo, hi] = random_bytes::<2>();
    49152 + u16::from_le_bytes([lo, hi]) % 16384
}

/// Parses a pasted authorization input (bare code or full redirect URL) into a code.
///
/// Returns `None` when the input is empty, or when it is a redirect URL that
/// carries an `error` instead of a `code`.
pub fn parse_authorization_input(input: &str) -> Option<String> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(url) = url::Url::parse(value) {
        return url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.to_string());
    }

    if value.contains("code=") {
        let query = value.trim_start_matches('?');
        return url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.to_string());
    }

    Some(value.to_string())
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 || !token.is_char_boundary(12) {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_generation() {
        let pkce = generate_pkce();
        // base64url of 32 bytes is 43 chars
        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.challenge.is_empty());
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn test_random_port_is_high() {
        for _ in 0..32 {
            assert!(random_local_port() >= 49152);
        }
    }

    #[test]
    fn test_parse_authorization_input_variants() {
        assert_eq!(parse_authorization_input("  "), None);
        assert_eq!(
            parse_authorization_input("abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            parse_authorization_input("http://localhost:5000/auth/callback?code=xyz").as_deref(),
            Some("xyz")
        );
        assert_eq!(
            parse_authorization_input("?code=q1&state=s").as_deref(),
            Some("q1")
        );
        assert_eq!(
            parse_authorization_input("http://localhost:5000/auth/callback?error=access_denied"),
            None
        );
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("eyJhbGciOiJIUzI1NiJ9.payload"), "eyJhbGciOiJI...");
        assert_eq!(mask_token("short"), "***");
    }
}
