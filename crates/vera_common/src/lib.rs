//! Vera Common - shared data model for the command orchestration engine.
//!
//! Everything a run produces or consumes lives here: configuration, the
//! system context fed to the planner, command results, the oracle plan and
//! evaluation schemas, and the per-run working memory. The engine itself
//! lives in `verad`.

pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod plan;
pub mod result;

pub use config::*;
pub use context::*;
pub use error::*;
pub use memory::*;
pub use plan::*;
pub use result::*;
