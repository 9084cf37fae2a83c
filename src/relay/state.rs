// ABOUTME: Relay pair state types for the type state pattern.
// ABOUTME: A pair can only pump bytes once its remote channel has been dialed.

use super::BoxedStream;

/// Local connection accepted, no remote channel yet.
/// Available actions: `dial()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Accepted;

/// Remote channel open.
/// Available actions: `run()`
pub struct Active {
    pub(super) remote: BoxedStream,
}

impl std::fmt::Debug for Active {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Active").finish_non_exhaustive()
    }
}
