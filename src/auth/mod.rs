pub mod claims;
pub mod extractors;
pub mod jwt;
pub mod password;

pub use extractors::{AuthUser, JsonBody, ACCESS_COOKIE, REFRESH_COOKIE};
pub use jwt::{TokenError, TokenIssuer, TokenPair};
