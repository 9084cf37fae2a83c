// ABOUTME: Validated domain types parsed from user input.
// ABOUTME: Addresses, principals and SSH server targets.

mod address;
mod principal;
mod target;

pub use address::{Address, AddressError, NetworkKind};
pub use principal::{Principal, PrincipalError};
pub use target::{DEFAULT_SSH_PORT, ServerTarget, TargetError};
