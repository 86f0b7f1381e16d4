pub mod engine;
pub mod strategy;

#[cfg(test)]
mod tests;

pub use engine::{SyncEngine, SyncOptions, SyncReport};
pub use strategy::{FetchOutcome, StrategyResolver};
