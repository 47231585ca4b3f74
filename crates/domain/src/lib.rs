//! `th-domain`: shared types for the toolhost crates.
//!
//! - [`tool`]: tool descriptors and the [`ToolRegistry`](tool::ToolRegistry)
//!   seam every registry (local or remote) implements.
//! - [`resource`]: readable resources and the
//!   [`ResourceRegistry`](resource::ResourceRegistry) seam.
//! - [`settings`]: parameters a server declares for its configuration record.
//! - [`stream`]: incremental tool output (`StreamChunk`) and the boxed
//!   stream type used to carry it.
//! - [`config`]: runtime configuration of the `toolhost` binary.
//! - [`error`]: the shared error type.

pub mod config;
pub mod error;
pub mod resource;
pub mod settings;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
