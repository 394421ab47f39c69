//! Bearer-token verification.
//!
//! Token issuance (credential checks, login flow) lives outside this
//! server; connections arrive carrying an opaque HS256 token whose `sub`
//! claim is the owning user id. Browsers cannot set headers on WebSocket
//! upgrades, so the token is also accepted as a `token` query parameter.

use axum::http::HeaderMap;
use serde::Deserialize;

/// The authenticated caller of a request or stream.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verify a token with HMAC-SHA256 signature validation and return the
/// user it identifies.
pub fn verify_token(token: &str, secret: &str) -> Result<AuthedUser, String> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    // Required claims are checked by serde deserialization
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    let token_data = decode::<Claims>(token, &key, &validation)
        .map_err(|e| format!("token verification failed: {}", e))?;

    Ok(AuthedUser {
        user_id: token_data.claims.sub,
    })
}

/// Pull the bearer token out of the `Authorization` header, falling back
/// to the `token` query parameter.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or_else(|| query_token.map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: u64,
    }

    fn mint(sub: &str, secret: &str) -> String {
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let token = mint("alice", "s3cret");
        let user = verify_token(&token, "s3cret").unwrap();
        assert_eq!(user.user_id, "alice");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = mint("alice", "s3cret");
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(verify_token("not-a-jwt", "s3cret").is_err());
    }

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(
            extract_token(&headers, Some("from-query")).as_deref(),
            Some("from-header")
        );
        assert_eq!(
            extract_token(&HeaderMap::new(), Some("from-query")).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_token(&HeaderMap::new(), None), None);
    }
}
