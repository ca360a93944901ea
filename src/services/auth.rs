use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const ACCESS_TOKEN_MINUTES: i64 = 60;
pub const REFRESH_TOKEN_DAYS: i64 = 7;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub jti: String,
    pub token_type: String,
}

/// JWT issuing/validation plus the in-process revocation set.
///
/// Revoked JTIs live in memory with TTL equal to the token expiry; a
/// restart empties the set, which is acceptable because access tokens are
/// short-lived and refresh cookies are rotated on every use.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    revoked: Arc<Mutex<HashMap<String, i64>>>,
}

impl AuthService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            revoked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_access_token(&self, login: &str) -> AppResult<(String, Claims)> {
        self.create_token(login, TOKEN_TYPE_ACCESS, Duration::minutes(ACCESS_TOKEN_MINUTES))
    }

    pub fn create_refresh_token(&self, login: &str) -> AppResult<(String, Claims)> {
        self.create_token(login, TOKEN_TYPE_REFRESH, Duration::days(REFRESH_TOKEN_DAYS))
    }

    fn create_token(
        &self,
        login: &str,
        token_type: &str,
        ttl: Duration,
    ) -> AppResult<(String, Claims)> {
        let claims = Claims {
            sub: login.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: token_type.to_string(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("token encoding failed: {}", e)))?;
        Ok((token, claims))
    }

    pub fn decode_token(&self, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::auth("Token expired"),
                _ => AppError::auth("Invalid token"),
            },
        )?;

        if self.is_revoked(&data.claims.jti) {
            return Err(AppError::auth("Token revoked"));
        }
        Ok(data.claims)
    }

    pub fn revoke(&self, jti: &str, exp: i64) {
        let mut revoked = self.revoked.lock().expect("revocation lock poisoned");
        revoked.insert(jti.to_string(), exp);
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked
            .lock()
            .expect("revocation lock poisoned")
            .contains_key(jti)
    }

    /// Drop revocations whose tokens have expired on their own.
    pub fn purge_expired_revocations(&self) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.lock().expect("revocation lock poisoned");
        let before = revoked.len();
        revoked.retain(|_, exp| *exp > now);
        let purged = before - revoked.len();
        if purged > 0 {
            tracing::info!(purged, "expired token revocations dropped");
        }
    }

    pub fn hash_password(password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::internal(format!("password hashing failed: {}", e)))
    }

    pub fn verify_password(password: &str, password_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("unit-test-secret")
    }

    #[test]
    fn test_token_round_trip() {
        let auth = service();
        let (token, claims) = auth.create_access_token("alice").unwrap();
        let decoded = auth.decode_token(&token).unwrap();
        assert_eq!(decoded.sub, "alice");
        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.token_type, TOKEN_TYPE_ACCESS);
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let auth = service();
        let (token, _) = auth.create_access_token("alice").unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        assert!(auth.decode_token(&tampered).is_err());

        let other = AuthService::new("different-secret");
        assert!(other.decode_token(&token).is_err());
    }

    #[test]
    fn test_revocation() {
        let auth = service();
        let (token, claims) = auth.create_refresh_token("alice").unwrap();
        assert!(auth.decode_token(&token).is_ok());

        auth.revoke(&claims.jti, claims.exp);
        assert!(auth.is_revoked(&claims.jti));
        assert!(auth.decode_token(&token).is_err());
    }

    #[test]
    fn test_purge_drops_only_expired() {
        let auth = service();
        auth.revoke("old", Utc::now().timestamp() - 10);
        auth.revoke("live", Utc::now().timestamp() + 3600);
        auth.purge_expired_revocations();
        assert!(!auth.is_revoked("old"));
        assert!(auth.is_revoked("live"));
    }

    #[test]
    fn test_password_hashing() {
        let hash = AuthService::hash_password("p@ss").unwrap();
        assert_ne!(hash, "p@ss");
        assert!(AuthService::verify_password("p@ss", &hash));
        assert!(!AuthService::verify_password("wrong", &hash));
        assert!(!AuthService::verify_password("p@ss", "not-a-hash"));
    }
}
