//! Admin auth: single admin account, bearer JWT,
//! optional via `ADMIN_AUTH_ENABLED`.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod service;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use service::AuthService;
