//! Remote plan and apply over HTTP
//!
//! - `GET  /api/v1/ping`, `GET /api/v1/version`
//! - `POST /api/v1/machine/{plan,apply,healthcheck}` with
//!   `{"location": "...", "params": {..}}`, answered with a stream of
//!   newline-delimited JSON frames (see [`protocol`])

pub mod client;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use protocol::{MachineRequest, Mode, Run};
pub use server::AppState;
