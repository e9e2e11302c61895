//! HTTP gateway: server, router, authorization gate, and forwarding

pub mod auth;
pub mod forward;
pub mod hooks;
pub mod router;
pub mod server;

pub use router::{AppState, create_router};
pub use server::Proxy;
