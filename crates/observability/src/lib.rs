//! Logging setup shared by binaries and tests.

pub mod subscriber;

pub use subscriber::{init, init_test};
