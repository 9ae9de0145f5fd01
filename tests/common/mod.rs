//! Common test utilities for airwall-bundler integration tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod controller;

pub use config::*;
#[allow(unused_imports)]
pub use controller::*;
