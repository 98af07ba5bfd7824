//! kytos-core — shared data model for the Kytos placement optimizer.
//!
//! Every other crate in the workspace speaks these types: the cluster
//! snapshot a caller submits, the annealing settings that weight the
//! objective, and the plan that comes back.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, KytosConfig, ServerConfig};
pub use error::{OptimizeError, OptimizeResult};
pub use types::*;
