//! Function-backed tool registry and the demo tools of the `toolhost` binary.
//!
//! - [`FnRegistry`]: an explicit table of descriptors and async handlers,
//!   implementing [`ToolRegistry`](th_domain::tool::ToolRegistry).
//! - [`FnResources`]: the same for readable resources.
//! - [`demo`]: `echo`, `add`, `generate_sequence`, `stream_words`, `list_dir`,
//!   the `file://` and `dir://root` resources and the `default_dir` setting.
//! - [`fs`]: directory listing confined to a root.

pub mod demo;
pub mod fs;
pub mod registry;
pub mod resources;

pub use demo::{demo_parameters, demo_registry, demo_resources, DirRoot, DEFAULT_DIR_KEY};
pub use registry::{validate_arguments, FnRegistry};
pub use resources::FnResources;
