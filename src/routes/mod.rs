//! Plain HTTP routes served next to the WebSocket endpoint

pub mod health;

pub use health::{health_check, version_info};
