// ABOUTME: Library root for catapult - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod output;
pub mod relay;
pub mod signing;
pub mod ssh;
pub mod tunnel;
pub mod types;
