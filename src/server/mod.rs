//! HTTP surface: JSON API routes, WebSocket event feed and server bootstrap.

pub mod api;
#[allow(clippy::module_inception)]
pub mod server;
pub mod ws;

pub use api::{AppState, SharedState};
pub use server::{ServerConfig, build_router, build_state, start_server};
