mod jwt;
mod noop;
mod oidc;
mod psk;

pub use jwt::JwtAuthenticator;
pub use noop::NoopAuthenticator;
pub use oidc::OidcAuthenticator;
pub use psk::PskAuthenticator;
