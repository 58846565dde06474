//! Sysop dashboard authentication — narrow JWT gate for the two
//! cross-tenant reads in `cache::CacheManager` (spec.md §4.AMBIENT-AUTH).

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use user_store::UserStore;
