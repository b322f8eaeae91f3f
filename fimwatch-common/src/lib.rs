#![cfg_attr(not(any(test, feature = "user")), no_std)]

pub mod device;
pub mod event;
pub mod identity;
pub mod layout;
pub mod memory;
pub mod probe;
pub mod rules;

#[cfg(any(test, feature = "user"))]
pub mod channel;
#[cfg(feature = "user")]
pub mod config;
#[cfg(test)]
mod testing;

pub use event::{EventKind, MutationEvent, RawEvent, WireError};
pub use identity::FsIdentity;
pub use layout::{KernelLayout, ProbeConfig, RenameConvention};
pub use rules::WatchRule;

/// Capacity of the rule table shared between the loader and the probes.
pub const MAX_RULES: u32 = 200_000;
pub const TASK_COMM_LEN: usize = 16;
/// Object names longer than this are truncated on the wire.
pub const NAME_LEN: usize = 32;

#[cfg(feature = "user")]
mod pod {
    unsafe impl aya::Pod for crate::WatchRule {}
    unsafe impl aya::Pod for crate::ProbeConfig {}
    unsafe impl aya::Pod for crate::RawEvent {}
}
