//! Common test utilities for epub2audio integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod tools;

#[allow(unused_imports)]
pub use fixtures::*;
pub use tools::*;
