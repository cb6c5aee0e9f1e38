//! C7: Request API. Wire types (§6), the axum server router, and the
//! reqwest client, so the server and the client binaries share one source
//! of truth for the wire contract.

pub mod client;
pub mod server;
pub mod types;

pub use client::ApiClient;
pub use server::{router, ServerState};
