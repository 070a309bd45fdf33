//! Concrete implementations of the service traits.

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::{MemoryChangeBus, MemorySnapshots};
