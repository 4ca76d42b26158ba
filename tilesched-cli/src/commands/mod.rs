//! CLI command implementations.

pub mod config;
pub mod fetch;
pub mod simulate;
