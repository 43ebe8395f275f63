//! Host for a bytecode executor that runs as a WebAssembly engine, with
//! functions lazily replaced by ahead-of-time compiled modules.

pub mod arena;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
mod executor;
pub mod host;
pub mod loader;
pub mod program;

pub type ProgramId = u32;
pub type FunctionId = u32;
pub type GlobalId = u32;

pub use bridge::{GlobalSlots, Status};
pub use cache::CacheState;
pub use config::HostConfig;
pub use error::{HostError, Result};
pub use executor::Handle;
pub use host::{Host, HostState};
pub use loader::{DirLoader, FunctionLoader};
pub use program::{Program, ProgramStats};
