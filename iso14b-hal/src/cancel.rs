//! Host cancellation signal, abstracting the button/host-packet collaborator
//! the tag emulator and sniffer main loops poll between frames.

pub trait HostCancel {
    /// True once the operator has requested the current loop stop.
    fn cancelled(&self) -> bool;
}

/// A `HostCancel` that never fires, for tests and single-shot callers.
pub struct NeverCancel;

impl HostCancel for NeverCancel {
    fn cancelled(&self) -> bool {
        false
    }
}
