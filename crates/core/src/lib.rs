// Core types and functionality for the Miniflow workflow engine

pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;
pub mod workflow;

pub use config::{RunConfig, RunOptions};
pub use document::Document;
pub use error::{FlowError, FlowResult};
pub use types::*;
