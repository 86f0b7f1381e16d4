//! Pull work items from Azure DevOps, Jira and GitHub into local records and
//! push permitted local changes back.

pub mod cache;
pub mod deps;
pub mod error;
pub mod model;
pub mod providers;
pub mod query;
pub mod ratelimit;
pub mod reconcile;
pub mod retry;
pub mod sync;
pub mod util;

pub use error::{Result, SyncError};
pub use sync::{SyncEngine, SyncOptions, SyncReport};
