//! Command-line front end for the dataforge engine
//!
//! The binary lives in `main.rs`; the modules here are shared with the
//! integration tests.

pub mod config;
pub mod error;
pub mod orchestrators;
pub mod output;
pub mod paths;
pub mod progress;
pub mod terminal;
