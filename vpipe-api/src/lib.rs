//! Subscription bus and HTTP/WebSocket surface.

pub mod bus;
pub mod http;

pub use bus::Bus;
pub use http::{router, AppState};
