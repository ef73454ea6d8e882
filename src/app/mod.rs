pub mod client;
pub mod engine;
pub mod merge;
pub mod model;
pub mod mutations;
pub mod queue;
pub mod reconcile;
pub mod refresh;
pub mod stats;
pub mod store;
pub mod tracker;
