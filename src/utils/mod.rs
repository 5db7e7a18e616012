pub mod jwt;
pub mod webhook_auth;

pub use jwt::*;
pub use webhook_auth::*;
