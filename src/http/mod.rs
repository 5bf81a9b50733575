//! HTTP surface: health, WebSocket upgrade, room provisioning

pub mod middleware;
pub mod routes;

pub use routes::build_router;
