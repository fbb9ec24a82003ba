use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::JwtConfig;
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,    // user ID
    pub iat: usize,  // issued at (unix timestamp)
    pub exp: usize,  // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
}

/// A freshly signed session token and the unix second it stops being valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::hours(cfg.ttl_hours),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<IssuedToken, AppError> {
        let now = OffsetDateTime::now_utc();
        let exp = (now + self.ttl).unix_timestamp();
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding).map_err(AppError::internal)?;
        debug!(user_id, "jwt signed");
        Ok(IssuedToken {
            token,
            expires_at: exp,
        })
    }

    /// Checks signature, issuer, audience and `exp`. Says nothing about
    /// whether the session is still live; that lives on the user row.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            AppError::new(ErrorKind::Unauthenticated, "invalid or expired token")
        })?;
        Ok(data.claims)
    }
}
