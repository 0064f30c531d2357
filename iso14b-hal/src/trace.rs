//! Trace record emitted by the reader driver and the sniffer, abstracting
//! the cyclic trace buffer collaborator named as out of scope in the system
//! overview.

use crate::clock::Ticks;

/// Maximum payload length captured in a single `TraceRecord`.
///
/// Sized to the largest frame body this crate ever decodes as one unit
/// (an ATQB/SRx reply or a short APDU); longer I-block payloads are still
/// decoded and returned to the caller, just not mirrored into the trace.
pub const MAX_TRACE_BYTES: usize = 64;

/// Which side of the air interface a `TraceRecord` was captured from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Reader,
    Tag,
}

/// One captured frame, timestamped at both ends.
///
/// Timestamps are sub-carrier ticks; a host interpreting them multiplies by
/// 4, which this crate does not do on the caller's behalf.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TraceRecord {
    bytes: [u8; MAX_TRACE_BYTES],
    len: usize,
    pub start_ts: Ticks,
    pub end_ts: Ticks,
    pub crc_ok: Option<bool>,
    pub direction: Direction,
}

impl TraceRecord {
    pub fn new(
        frame: &[u8],
        start_ts: Ticks,
        end_ts: Ticks,
        crc_ok: Option<bool>,
        direction: Direction,
    ) -> Self {
        let mut bytes = [0u8; MAX_TRACE_BYTES];
        let len = frame.len().min(MAX_TRACE_BYTES);
        bytes[..len].copy_from_slice(&frame[..len]);
        TraceRecord {
            bytes,
            len,
            start_ts,
            end_ts,
            crc_ok,
            direction,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Sink for completed `TraceRecord`s, abstracting the cyclic trace buffer.
pub trait TraceSink {
    fn record(&mut self, record: TraceRecord);
}

/// A `TraceSink` that discards every record, for tests that don't assert on
/// tracing and for single-shot callers that want raw bytes only.
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&mut self, _record: TraceRecord) {}
}
