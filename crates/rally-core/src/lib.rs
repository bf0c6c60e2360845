//! Rally access core: session tracking, backend reconciliation, config and logging.

pub mod auth;
pub mod config;
pub mod logging;
pub mod storage;
