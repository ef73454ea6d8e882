#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

pub use app::engine::SiteSync;
pub use error::SyncError;
