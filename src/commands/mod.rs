// ABOUTME: Command module aggregator for the catapult CLI.
// ABOUTME: Re-exports the tunnel command handler.

mod tunnel;

pub use tunnel::tunnel;
