use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

/// S3-compatible bucket that holds avatars and cover images.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Prefix that turns an object key into a public URL.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub cookie_secure: bool,
    pub request_timeout: Duration,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;

        let access_secret = required("ACCESS_TOKEN_SECRET")?;
        let refresh_secret = required("REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            anyhow::bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }
        let access_ttl = parse_expiry(&optional("ACCESS_TOKEN_EXPIRY", "1d"))
            .context("ACCESS_TOKEN_EXPIRY")?;
        let refresh_ttl = parse_expiry(&optional("REFRESH_TOKEN_EXPIRY", "10d"))
            .context("REFRESH_TOKEN_EXPIRY")?;
        let jwt = JwtConfig {
            access_secret,
            access_ttl,
            refresh_secret,
            refresh_ttl,
            issuer: optional("JWT_ISSUER", "vidtube"),
            audience: optional("JWT_AUDIENCE", "vidtube-users"),
        };

        let endpoint = required("STORAGE_ENDPOINT")?;
        let bucket = required("STORAGE_BUCKET")?;
        let public_url = std::env::var("STORAGE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            endpoint,
            bucket,
            access_key: required("STORAGE_ACCESS_KEY")?,
            secret_key: required("STORAGE_SECRET_KEY")?,
            region: optional("STORAGE_REGION", "us-east-1"),
            public_url: public_url.trim_end_matches('/').to_string(),
        };

        let cookie_secure = std::env::var("COOKIE_SECURE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let request_timeout = Duration::from_secs(
            std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        );
        let port = std::env::var("APP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        Ok(Self {
            database_url,
            jwt,
            storage,
            cookie_secure,
            request_timeout,
            host: optional("APP_HOST", "0.0.0.0"),
            port,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Upper bound for token lifetimes (100 years); keeps `exp` arithmetic in range.
const MAX_EXPIRY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Parses token lifetimes such as `3600`, `15m`, `12h` or `10d`.
pub fn parse_expiry(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c),
        Some(_) => (raw, 's'),
        None => anyhow::bail!("empty expiry"),
    };
    let n: u64 = digits
        .parse()
        .with_context(|| format!("invalid expiry {raw:?}"))?;
    let scale: u64 = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 60 * 60 * 24,
        other => anyhow::bail!("unknown expiry unit {other:?} in {raw:?}"),
    };
    let secs = n
        .checked_mul(scale)
        .filter(|s| *s <= MAX_EXPIRY_SECS)
        .with_context(|| format!("expiry {raw:?} is too large"))?;
    if secs == 0 {
        anyhow::bail!("expiry must be positive");
    }
    Ok(Duration::from_secs(secs))
}
