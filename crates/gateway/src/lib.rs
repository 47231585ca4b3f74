//! `th-gateway`: the `toolhost` server.
//!
//! - [`stream`]: invocation modes and SSE frame encodings (raw, OpenAI deltas).
//! - [`api`]: the axum HTTP surface.
//! - [`stdio`]: line-delimited JSON-RPC over stdin/stdout.
//! - [`bootstrap`]: instance selection and [`AppState`](state::AppState) wiring.
//! - [`cli`]: command-line definitions.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod stdio;
pub mod stream;
