//! `th-client`: talk to tool servers running as child processes.
//!
//! This crate provides:
//! - Binary format detection deciding how a server target is started.
//! - JSON-RPC 2.0 wire types for the newline-delimited stdio protocol.
//! - A process transport that multiplexes concurrent calls over one child.
//! - [`SimpleClient`], a typed facade, and [`RemoteRegistry`], which serves
//!   a child's tools through the [`ToolRegistry`](th_domain::tool::ToolRegistry)
//!   trait.
//!
//! # Usage
//!
//! ```rust,ignore
//! use th_client::{ClientOptions, SimpleClient};
//!
//! let client = SimpleClient::connect(ClientOptions::new("./toolhost").alias("dev")).await?;
//! println!("{:?}", client.tools());
//! let sum = client.call("add", json!({ "a": 2, "b": 3 })).await?;
//! client.close().await;
//! ```

pub mod client;
pub mod detect;
pub mod protocol;
pub mod remote;
pub mod transport;

pub use client::{quick_call, ClientError, ClientOptions, SimpleClient};
pub use detect::{classify, Classification, Invocation, NativeFormat};
pub use remote::RemoteRegistry;
pub use transport::{ConnectOptions, ProcessSession, SessionState, TransportError};
