//! Keyward - local WebCrypto service
//!
//! Keyward lets a web page use keys it never sees. Clients send MessagePack
//! action frames over a WebSocket; keys and certificates stay in the server
//! process (or on a hardware token) and cross the wire only as opaque handles.
//!
//! ## Layers
//!
//! - **Protocol**: action/result envelopes and per-action parameter schemas
//! - **Session**: one per connection; routes, resolves providers, checks login
//! - **Services**: `crypto/subtle`, key and certificate storage, `provider`, `server`
//! - **Providers**: software, hardware token and hybrid backends
//! - **Registry**: process-wide handle id → live key/certificate map

pub mod config;
pub mod crypto;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod routes;
pub mod server;
pub mod service;
pub mod session;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KeywardError, Result};
