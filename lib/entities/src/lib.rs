//! Shared wire and configuration types for Gantry: the component
//! configuration schema, the distributed state records exchanged
//! through the key-value store, and the KV path layout.

pub mod config;
pub mod paths;
pub mod state;

pub use config::*;
pub use state::*;
