//! JWT issuance and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub nbf: usize,
    pub iss: String,
    pub aud: String,
    pub jti: String,
    pub session_id: String,
    pub user_role: String,
    pub token_type: TokenType,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_duration: Duration,
    refresh_duration: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, issuer: String, audience: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            issuer,
            audience,
            access_duration: Duration::from_secs(24 * 60 * 60),
            refresh_duration: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    pub fn with_durations(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_duration = access;
        self.refresh_duration = refresh;
        self
    }

    pub fn access_duration(&self) -> Duration {
        self.access_duration
    }

    pub fn generate_token(
        &self,
        user_id: &str,
        session_id: &str,
        user_role: &str,
        token_type: TokenType,
    ) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::TokenCreation("system time error".to_string()))?;

        let lifetime = match token_type {
            TokenType::Access => self.access_duration,
            TokenType::Refresh => self.refresh_duration,
        };

        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + lifetime).as_secs() as usize,
            iat: now.as_secs() as usize,
            nbf: now.as_secs() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_role: user_role.to_string(),
            token_type,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::TokenCreation(err.to_string()))
    }

    /// Validate signature, issuer, audience and expiry, and require the
    /// expected token type.
    pub fn validate_token(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_nbf = true;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })?;

        if token_data.claims.token_type != expected {
            return Err(AuthError::InvalidToken("unexpected token type".to_string()));
        }

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new(
            "test_secret_key_that_is_long_enough_for_hs256",
            "test_issuer".to_string(),
            "test_audience".to_string(),
        )
    }

    #[test]
    fn access_token_round_trip() {
        let jwt = manager();
        let token = jwt
            .generate_token("user-1", "session-1", "client", TokenType::Access)
            .unwrap();

        let claims = jwt.validate_token(&token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.session_id, "session-1");
        assert_eq!(claims.user_role, "client");
        assert_eq!(claims.iss, "test_issuer");
        assert_eq!(claims.aud, "test_audience");
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let jwt = manager();
        let refresh = jwt
            .generate_token("user-1", "session-1", "client", TokenType::Refresh)
            .unwrap();

        assert!(matches!(
            jwt.validate_token(&refresh, TokenType::Access),
            Err(AuthError::InvalidToken(_))
        ));
        let claims = jwt.validate_token(&refresh, TokenType::Refresh).unwrap();
        assert_eq!(claims.exp - claims.iat, 30 * 24 * 60 * 60);
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let token = manager()
            .generate_token("user-1", "session-1", "admin", TokenType::Access)
            .unwrap();
        let other = JwtManager::new(
            "test_secret_key_that_is_long_enough_for_hs256",
            "test_issuer".to_string(),
            "someone_else".to_string(),
        );
        assert!(other.validate_token(&token, TokenType::Access).is_err());
        assert!(manager().validate_token("invalid.jwt.token", TokenType::Access).is_err());
    }

    #[test]
    fn expired_token_reports_expiry() {
        let jwt = manager();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as usize;
        let claims = Claims {
            sub: "user-1".into(),
            exp: now - 3_600,
            iat: now - 7_200,
            nbf: now - 7_200,
            iss: "test_issuer".into(),
            aud: "test_audience".into(),
            jti: "jti".into(),
            session_id: "session-1".into(),
            user_role: "client".into(),
            token_type: TokenType::Access,
        };
        let token = encode(&Header::default(), &claims, &jwt.encoding_key).unwrap();

        assert!(matches!(
            jwt.validate_token(&token, TokenType::Access),
            Err(AuthError::TokenExpired)
        ));
    }
}
