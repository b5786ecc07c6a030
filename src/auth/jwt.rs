//! JWT issuance/validation for the single admin account.

use crate::auth::models::Claims;
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            expiration_hours: 24,
        }
    }

    pub fn generate_token(&self, subject: &str) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: subject.to_string(),
            exp: expiration,
        };
        debug!(subject, "issuing admin JWT");
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .context("failed to sign JWT")?;
        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &Validation::default())
            .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let handler = JwtHandler::new("test-secret".into());
        let (token, expires_in) = handler.generate_token("admin").unwrap();
        assert_eq!(expires_in, 24 * 3600);
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "admin");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = JwtHandler::new("secret-a".into());
        let verifier = JwtHandler::new("secret-b".into());
        let (token, _) = issuer.generate_token("admin").unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let handler = JwtHandler::new("secret".into());
        assert!(handler.validate_token("not.a.jwt").is_err());
    }
}
