//! Dashboard Basic Auth and HQ bearer-token verification. Pure logic here; axum extraction and
//! the `WWW-Authenticate` challenge live in the server crate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{CoreError, CoreResult};

/// Dashboard auth configuration. `None` means auth is disabled (the default for local-only use).
#[derive(Debug, Clone)]
pub struct DashboardAuth {
    password: String,
}

impl DashboardAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Verifies an `Authorization: Basic base64(user:pass)` header value. The username is
    /// ignored; the password is compared byte-for-byte in constant time to avoid a timing
    /// oracle on the comparison itself.
    pub fn verify_basic(&self, header_value: &str) -> CoreResult<()> {
        let encoded = header_value
            .strip_prefix("Basic ")
            .ok_or(CoreError::Unauthorized)?;
        let decoded_bytes = BASE64.decode(encoded).map_err(|_| CoreError::Unauthorized)?;
        let decoded = String::from_utf8(decoded_bytes).map_err(|_| CoreError::Unauthorized)?;
        let (_, password) = decoded.split_once(':').ok_or(CoreError::Unauthorized)?;

        if constant_time_eq(password.as_bytes(), self.password.as_bytes()) {
            Ok(())
        } else {
            Err(CoreError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// HQ bearer-token check: compares the `Authorization: Bearer <token>` header against a remote's
/// registered token.
pub fn verify_bearer(header_value: &str, expected_token: &str) -> CoreResult<()> {
    let token = header_value.strip_prefix("Bearer ").ok_or(CoreError::Unauthorized)?;
    if constant_time_eq(token.as_bytes(), expected_token.as_bytes()) {
        Ok(())
    } else {
        Err(CoreError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_password_regardless_of_username() {
        let auth = DashboardAuth::new("hunter2".to_string());
        // "alice:hunter2"
        assert!(auth.verify_basic("Basic YWxpY2U6aHVudGVyMg==").is_ok());
    }

    #[test]
    fn rejects_wrong_password() {
        let auth = DashboardAuth::new("hunter2".to_string());
        // "alice:wrong"
        assert!(auth.verify_basic("Basic YWxpY2U6d3Jvbmc=").is_err());
    }

    #[test]
    fn bearer_token_must_match() {
        assert!(verify_bearer("Bearer abc123", "abc123").is_ok());
        assert!(verify_bearer("Bearer abc124", "abc123").is_err());
    }
}
