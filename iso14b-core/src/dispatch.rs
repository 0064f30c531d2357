//! Host command surface: the entry points a command
//! dispatcher (named as an out-of-scope collaborator) calls into.
//!
//! `raw` mirrors a bitmask-flagged single command that folds connect,
//! timeout, selection, APDU, and disconnect into one call, executed in a
//! fixed order regardless of which bits the host set, matching how the
//! original host protocol packs multiple reader operations into one
//! request instead of round-tripping per step.

use crate::demod::DEMOD_MAX_BYTES;
use crate::error::CoreError;
use crate::reader::{Reader, ReaderSession};
use crate::sniffer::Sniffer;
use crate::tag::Tag;
use iso14b_hal::{BitSampleSource, Clock, FieldSense, HostCancel, IqSampleSource, RadioTx, Ticks, TraceSink};
use num_enum::TryFromPrimitive;

/// Top-level command a host transport dispatches into, the numeric id a
/// command frame's first byte carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HostCommandId {
    Raw = 0,
    ReadStMemory = 1,
    SimulateTag = 2,
    Sniff = 3,
}

/// Connect (re)synchronizes the session and forgets any prior selection.
pub const ISO14B_CONNECT: u16 = 1 << 0;
/// Select a standard ISO 14443-3 Type B card (`WUPB` -> `ATQB` -> `ATTRIB`).
pub const ISO14B_SELECT_STD: u16 = 1 << 1;
/// Select an SRx-family card (`INITIATE` -> `SELECT` -> `GET_UID`).
pub const ISO14B_SELECT_SR: u16 = 1 << 2;
/// Apply the timeout carried alongside this call before any exchange.
pub const ISO14B_SET_TIMEOUT: u16 = 1 << 3;
/// Exchange `data` as an I-block APDU against the currently selected card.
pub const ISO14B_APDU: u16 = 1 << 4;
/// Exchange `data` verbatim, bypassing APDU framing.
pub const ISO14B_RAW: u16 = 1 << 5;
/// Persistently append a CRC_B to outgoing `RAW` payloads until toggled off.
pub const ISO14B_APPEND_CRC: u16 = 1 << 6;
/// Disconnect: forget the current selection after this call completes.
pub const ISO14B_DISCONNECT: u16 = 1 << 7;

/// Persistent per-connection state a host session carries across `raw`
/// calls (distinct from `ReaderSession`, which tracks protocol-level
/// timeout/frame-size/PCB state).
#[derive(Default)]
pub struct HostSession {
    pub connected: bool,
    pub append_crc: bool,
}

/// Execute one bitmask-flagged host command.
///
/// Sub-operations run in the fixed order `CONNECT -> SET_TIMEOUT ->
/// SELECT_STD -> SELECT_SR -> APDU -> RAW -> DISCONNECT`, independent of the
/// order the corresponding bits appear in `flags`; a host that sets several
/// bits at once gets exactly this sequencing every time.
pub fn raw<R, C, S, T>(
    reader: &mut Reader<R, C, S, T>,
    session: &mut ReaderSession,
    host: &mut HostSession,
    flags: u16,
    data: &[u8],
    timeout_ticks: Option<u32>,
    start_time: Ticks,
) -> Result<usize, CoreError>
where
    R: RadioTx,
    C: Clock,
    S: IqSampleSource,
    T: TraceSink,
{
    if flags & ISO14B_APPEND_CRC != 0 {
        host.append_crc = !host.append_crc;
    }

    if flags & ISO14B_CONNECT != 0 {
        host.connected = false;
    }

    if flags & ISO14B_SET_TIMEOUT != 0 {
        if let Some(t) = timeout_ticks {
            session.set_timeout(t);
        }
    }

    if flags & ISO14B_SELECT_STD != 0 {
        reader.select_card(session, 0x00, start_time)?;
        host.connected = true;
    }

    if flags & ISO14B_SELECT_SR != 0 {
        reader.select_srx_card(session, start_time)?;
        host.connected = true;
    }

    let mut response_len = 0usize;

    if flags & ISO14B_APDU != 0 {
        if !host.connected {
            return Err(CoreError::NotConnected);
        }
        response_len = reader.apdu(session, data, start_time)?;
    }

    if flags & ISO14B_RAW != 0 {
        if !host.connected {
            return Err(CoreError::NotConnected);
        }
        if host.append_crc {
            let mut buf = [0u8; DEMOD_MAX_BYTES];
            buf[..data.len()].copy_from_slice(data);
            let len = crate::crc::append_crc(&mut buf, data.len());
            response_len = reader.raw_exchange(session, &buf[..len], start_time)?;
        } else {
            response_len = reader.raw_exchange(session, data, start_time)?;
        }
    }

    if flags & ISO14B_DISCONNECT != 0 {
        host.connected = false;
    }

    Ok(response_len)
}

/// Maximum SRx blocks `read_st_memory` will fetch in one call.
pub const MAX_ST_BLOCKS: usize = 16;

/// Read `num_blocks` consecutive SRx memory blocks starting at address 0
/// into `out`, returning the number of bytes written.
pub fn read_st_memory<R, C, S, T>(
    reader: &mut Reader<R, C, S, T>,
    session: &mut ReaderSession,
    num_blocks: usize,
    out: &mut [u8; MAX_ST_BLOCKS * 4],
    start_time: Ticks,
) -> Result<usize, CoreError>
where
    R: RadioTx,
    C: Clock,
    S: IqSampleSource,
    T: TraceSink,
{
    let num_blocks = num_blocks.min(MAX_ST_BLOCKS);
    let mut written = 0;
    for addr in 0..num_blocks {
        let block = reader.read_st_block(session, addr as u8, start_time)?;
        out[written..written + 4].copy_from_slice(&block);
        written += 4;
    }
    Ok(written)
}

/// Run a simulated tag until cancelled.
pub fn simulate_tag<R, C, Sns, B, T>(
    radio: &mut R,
    clock: &C,
    sense: &Sns,
    bits: &mut B,
    trace: &mut T,
    cancel: &impl HostCancel,
    pupi: [u8; 4],
) -> Result<(), CoreError>
where
    R: RadioTx,
    C: Clock,
    Sns: FieldSense,
    B: BitSampleSource,
    T: TraceSink,
{
    let mut tag = Tag::new(radio, clock, sense, bits, trace, pupi);
    while !cancel.cancelled() {
        // A single malformed or CRC-mismatched frame is dropped; the UART
        // resyncs on its own and the field keeps being polled.
        let _ = tag.poll();
    }
    Ok(())
}

/// Run the passive sniffer until cancelled.
pub fn sniff<B, S, C, T>(
    bits: &mut B,
    iq: &mut S,
    clock: &C,
    trace: &mut T,
    cancel: &impl HostCancel,
) where
    B: BitSampleSource,
    S: IqSampleSource,
    C: Clock,
    T: TraceSink,
{
    let mut sniffer = Sniffer::new(bits, iq, clock, trace, cancel);
    sniffer.run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn host_command_id_round_trips_known_values() {
        assert_eq!(HostCommandId::try_from(0).unwrap(), HostCommandId::Raw);
        assert_eq!(HostCommandId::try_from(3).unwrap(), HostCommandId::Sniff);
        assert!(HostCommandId::try_from(4).is_err());
    }

    #[test]
    fn host_session_defaults_disconnected() {
        let host = HostSession::default();
        assert!(!host.connected);
        assert!(!host.append_crc);
    }

    #[test]
    fn append_crc_flag_toggles() {
        let mut host = HostSession::default();
        host.append_crc = !host.append_crc;
        assert!(host.append_crc);
        host.append_crc = !host.append_crc;
        assert!(!host.append_crc);
    }
}
