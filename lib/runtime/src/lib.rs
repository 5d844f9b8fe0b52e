//! The component runtime core (§4): the per-component lifecycle state
//! machine (`Component`, §4.2) and the process-wide owner that wires
//! components to the proxy and a termination worker pool
//! (`RuntimeManager`, §4.3).

mod component;
mod manager;
mod termination;

pub use component::Component;
pub use manager::{ResolvedLink, RuntimeManager};
