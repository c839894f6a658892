pub mod config;
pub mod queue;
pub mod reconcile;
pub mod schedule;
