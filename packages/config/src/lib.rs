// ABOUTME: Configuration primitives shared by DockerIDE packages
// ABOUTME: Exposes environment variable names and typed parsing helpers

pub mod constants;
pub mod env;

pub use env::{parse_flag, parse_value, EnvError};
