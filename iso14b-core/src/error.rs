//! Crate-wide error umbrella for the host command dispatch layer.
//!
//! Every lower-level module (`uart`, `demod`, `transceiver`, `reader`,
//! `tag`) keeps its own small error enum for its own callers and tests;
//! `CoreError` exists only so `dispatch` can return a single `Result` type
//! across its command handlers.

use crate::reader::ReaderError;
use crate::tag::TagError;
use crate::transceiver::TransceiverError;
use crate::uart::UartError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreError {
    Timeout,
    Overflow,
    Framing,
    Crc,
    Truncated,
    ChipIdMismatch,
    /// A command arrived that the current session state doesn't accept
    /// (e.g. `APDU` before a card has been selected).
    NotConnected,
}

impl From<TransceiverError> for CoreError {
    fn from(e: TransceiverError) -> Self {
        match e {
            TransceiverError::Timeout => CoreError::Timeout,
            TransceiverError::Overflow => CoreError::Overflow,
            TransceiverError::Framing => CoreError::Framing,
        }
    }
}

impl From<ReaderError> for CoreError {
    fn from(e: ReaderError) -> Self {
        match e {
            ReaderError::Timeout => CoreError::Timeout,
            ReaderError::Overflow => CoreError::Overflow,
            ReaderError::Framing => CoreError::Framing,
            ReaderError::Crc => CoreError::Crc,
            ReaderError::Truncated => CoreError::Truncated,
            ReaderError::ChipIdMismatch => CoreError::ChipIdMismatch,
        }
    }
}

impl From<TagError> for CoreError {
    fn from(e: TagError) -> Self {
        match e {
            TagError::Crc => CoreError::Crc,
            TagError::Framing => CoreError::Framing,
            TagError::Overflow => CoreError::Overflow,
        }
    }
}

impl From<UartError> for CoreError {
    fn from(e: UartError) -> Self {
        match e {
            UartError::FramingError => CoreError::Framing,
            UartError::BufferOverflow => CoreError::Overflow,
        }
    }
}
