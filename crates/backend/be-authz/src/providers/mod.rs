mod casbin;
mod noop;
mod opa;
mod zanzibar;

pub use casbin::{CasbinAuthorizer, DEFAULT_MODEL};
pub use noop::NoopAuthorizer;
pub use opa::OpaAuthorizer;
pub use zanzibar::ZanzibarAuthorizer;
