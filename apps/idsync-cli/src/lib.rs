//! idsync CLI library
//!
//! This library exposes internal modules for integration testing.
//! The main CLI binary is still in main.rs.

pub mod args;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
