//! Collaborator traits for the ISO 14443-3/4 Type B radio stack.
//!
//! `iso14b-core` implements the bit-level modems and the higher-level
//! reader/tag protocols against the traits in this crate. A concrete target
//! (FPGA register file, DMA/SSC ring, platform timer) implements them to
//! plug into the core; none of that hardware-specific machinery lives here.
#![no_std]

pub mod cancel;
pub mod clock;
pub mod radio;
pub mod sample;
pub mod sense;
pub mod status_led;
pub mod trace;

pub use cancel::{HostCancel, NeverCancel};
pub use clock::{Clock, Ticks};
pub use radio::{Modulation, RadioTx};
pub use sample::{BitSampleSource, IqSample, IqSampleSource};
pub use sense::FieldSense;
pub use status_led::{NullLed, StatusLed};
pub use trace::{Direction, NullTrace, TraceRecord, TraceSink, MAX_TRACE_BYTES};
