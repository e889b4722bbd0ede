//! Keel Platform Model
//!
//! The object graph the request layer hands to the reconciliation engine:
//! container specifications, environments, git provider accounts and image
//! registries. Field names follow the JSON documents stored by the API layer
//! (camelCase).

pub mod container;
pub mod environment;
pub mod error;
pub mod git_provider;
pub mod networking;
pub mod pod;
pub mod registry;
pub mod source;
pub mod units;
pub mod validation;
pub mod workload;

pub use container::*;
pub use environment::*;
pub use error::ModelError;
pub use git_provider::*;
pub use networking::*;
pub use pod::*;
pub use registry::*;
pub use source::*;
pub use units::*;
pub use workload::*;
