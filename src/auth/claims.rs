use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Payload of the short-lived token sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
    pub kind: TokenKind,
}

/// Payload of the long-lived token; carries nothing but the subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
    pub kind: TokenKind,
}

/// Display fields copied into an access token.
#[derive(Debug, Clone)]
pub struct UserClaims<'a> {
    pub id: Uuid,
    pub email: &'a str,
    pub username: &'a str,
    pub full_name: &'a str,
}
