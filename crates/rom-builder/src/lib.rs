pub mod artifacts;
pub mod config;
pub mod configurator;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod sequencer;
pub mod source;
pub mod toolchain;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
