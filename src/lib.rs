// Library module for statesync
// Re-exports modules for use in integration tests and the binary

pub mod config;
pub mod fs;
pub mod server;
pub mod sync;
