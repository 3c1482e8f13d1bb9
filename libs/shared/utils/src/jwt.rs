use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use shared_models::auth::{JwtClaims, User};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("JWT secret is not set")]
    MissingSecret,

    #[error("Invalid token format")]
    Malformed,

    #[error("Invalid signature encoding")]
    SignatureEncoding,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid claims encoding")]
    ClaimsEncoding,

    #[error("Invalid claims format")]
    ClaimsFormat,

    #[error("Token expired")]
    Expired,
}

/// Validates an HS256 token issued by the auth provider and maps its claims
/// onto a [`User`] carrying role and center assignment.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, TokenError> {
    if jwt_secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut parts = token.split('.');
    let (header_b64, claims_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(TokenError::Malformed),
    };

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        debug!("Failed to decode signature: {}", e);
        TokenError::SignatureEncoding
    })?;

    let mut mac = HmacSha256::new_from_slice(jwt_secret.as_bytes()).map_err(|_| TokenError::MissingSecret)?;
    mac.update(format!("{}.{}", header_b64, claims_b64).as_bytes());
    mac.verify_slice(&signature).map_err(|_| {
        debug!("Token signature verification failed");
        TokenError::BadSignature
    })?;

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| TokenError::ClaimsEncoding)?;
    let claims: JwtClaims = serde_json::from_slice(&claims_bytes).map_err(|e| {
        debug!("Failed to parse claims: {}", e);
        TokenError::ClaimsFormat
    })?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp().max(0) as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err(TokenError::Expired);
        }
    }

    let created_at = claims
        .iat
        .and_then(|issued| Utc.timestamp_opt(issued as i64, 0).single());

    let user = User {
        role: claims.app_role(),
        center_id: claims.center_id(),
        id: claims.sub,
        email: claims.email,
        metadata: claims.user_metadata,
        created_at,
    };

    debug!("Token validated for user: {} (center: {:?})", user.id, user.center_id);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JwtTestUtils, TestUser};
    use assert_matches::assert_matches;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn center_and_role_are_carried_into_user() {
        let test_user = TestUser::accountant("acc@example.com").with_center("center-1");
        let token = JwtTestUtils::create_test_token(&test_user, SECRET, Some(1));

        let user = validate_token(&token, SECRET).unwrap();
        assert_eq!(user.id, test_user.id);
        assert_eq!(user.role.as_deref(), Some("accountant"));
        assert_eq!(user.center_id.as_deref(), Some("center-1"));
        assert!(user.created_at.is_some());
    }

    #[test]
    fn rejects_bad_signature_and_expiry() {
        let test_user = TestUser::default();
        let forged = JwtTestUtils::create_invalid_signature_token(&test_user);
        assert_matches!(validate_token(&forged, SECRET), Err(TokenError::BadSignature));

        let expired = JwtTestUtils::create_expired_token(&test_user, SECRET);
        assert_matches!(validate_token(&expired, SECRET), Err(TokenError::Expired));

        let malformed = JwtTestUtils::create_malformed_token();
        assert!(validate_token(&malformed, SECRET).is_err());
        assert_matches!(validate_token("a.b", SECRET), Err(TokenError::Malformed));
        assert_matches!(validate_token("a.b.c.d", SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert_matches!(validate_token("a.b.c", ""), Err(TokenError::MissingSecret));
    }
}
