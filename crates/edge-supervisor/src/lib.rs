//! edge-supervisor library — exposes modules for the binary and integration tests.

pub mod cmd;
pub mod command;
pub mod env;
pub mod error;
pub mod patch;
pub mod paths;
pub mod shutdown;
pub mod status;
pub mod supervisor;
