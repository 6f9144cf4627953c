pub mod jwt;
pub mod middleware;

pub use middleware::{resolve_identity, AuthError, SessionUser};
