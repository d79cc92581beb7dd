use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::de::DeserializeOwned;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, RefreshClaims, TokenKind, UserClaims};
use crate::{config::JwtConfig, state::AppState};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        }
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Access/refresh pair handed out on login and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies both token kinds. Each kind has its own secret and lifetime.
#[derive(Clone)]
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
    issuer: String,
    audience: String,
}

impl FromRef<AppState> for TokenIssuer {
    fn from_ref(state: &AppState) -> Self {
        TokenIssuer::new(&state.config.jwt)
    }
}

impl TokenIssuer {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access: KeyPair::new(&cfg.access_secret, cfg.access_ttl),
            refresh: KeyPair::new(&cfg.refresh_secret, cfg.refresh_ttl),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    fn window(ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn issue_access(&self, user: &UserClaims<'_>) -> Result<String, TokenError> {
        let (iat, exp) = Self::window(self.access.ttl);
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.to_string(),
            username: user.username.to_string(),
            full_name: user.full_name.to_string(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let token =
            encode(&Header::default(), &claims, &self.access.encoding).map_err(TokenError::Sign)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let (iat, exp) = Self::window(self.refresh.ttl);
        let claims = RefreshClaims {
            sub: user_id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh.encoding)
            .map_err(TokenError::Sign)?;
        debug!(%user_id, "refresh token signed");
        Ok(token)
    }

    pub fn issue_pair(&self, user: &UserClaims<'_>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(user)?,
            refresh_token: self.issue_refresh(user.id)?,
        })
    }

    fn decode_with<C: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<C, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        Ok(decode::<C>(token, key, &validation)?.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode_with(token, &self.access.decoding)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode_with(token, &self.refresh.decoding)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }
}
