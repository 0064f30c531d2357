//! Reader protocol driver (C5): selection of a single
//! ISO 14443-3 Type B card or an SRx-family card, and I-block APDU exchange
//! once selected.
//!
//! This module assumes a single tag in the field; it performs no
//! anticollision slot sequencing.

use crate::constants::{MAX_TIMEOUT, VCD_TO_VICC};
use crate::crc::{append_crc, check_crc, crc16};
use crate::demod::{Demod, DEMOD_MAX_BYTES};
use crate::tosend::ToSend;
use crate::transceiver::{code_and_transmit_as_reader, get_answer_from_tag, FrameTiming, TransceiverError};
use iso14b_hal::{Clock, IqSampleSource, RadioTx, Ticks, TraceSink};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReaderError {
    Timeout,
    Overflow,
    Framing,
    /// The response's CRC_B did not match its body.
    Crc,
    /// A response was too short to contain the field being parsed.
    Truncated,
    /// An SRx `GET_UID` response's chip ID did not match the `SELECT` reply.
    ChipIdMismatch,
}

impl From<TransceiverError> for ReaderError {
    fn from(e: TransceiverError) -> Self {
        match e {
            TransceiverError::Timeout => ReaderError::Timeout,
            TransceiverError::Overflow => ReaderError::Overflow,
            TransceiverError::Framing => ReaderError::Framing,
        }
    }
}

/// FSCI/FSDI max-frame-size table, ISO 14443-4 Table 7; entries 9-15 are
/// RFU and fold to the largest defined size.
const FRAME_SIZE_TABLE: [u16; 16] = [
    16, 24, 32, 40, 48, 64, 96, 128, 256, 256, 256, 256, 256, 256, 256, 256,
];

/// Decode a max-frame-size nibble (the high nibble of ATQB protocol info
/// byte 2) into a byte count, clamped to `MAX_FRAME_SIZE`.
///
/// The original clamp checks `> 256` and then assigns 256, which is a
/// no-op given this table's own ceiling. Preserved literally rather than
/// simplified away.
pub fn decode_max_frame_size(nibble: u8) -> u16 {
    let size = FRAME_SIZE_TABLE[(nibble & 0x0F) as usize];
    if size > crate::constants::MAX_FRAME_SIZE {
        crate::constants::MAX_FRAME_SIZE
    } else {
        size
    }
}

/// Decode an FWI nibble into a frame-waiting-time timeout, in sample ticks.
pub fn decode_fwi_timeout(fwi: u8) -> u32 {
    let shift = fwi.min(14) as u32;
    (302u32.checked_shl(shift).unwrap_or(u32::MAX)).min(MAX_TIMEOUT)
}

/// A card selected via `select_card` or `select_srx_card`.
#[derive(Copy, Clone, Debug)]
pub struct SelectedCard {
    pub uid: [u8; 8],
    pub uid_len: usize,
    /// ATQB payload without its leading `0x50` byte or trailing CRC:
    /// `app_data[4]` then `protocol_info[3]`.
    pub atqb: [u8; 7],
    pub cid: u8,
    pub chipid: u8,
}

/// Per-session reader state carried across an `apdu` exchange.
pub struct ReaderSession {
    pcb_block_num: u8,
    pub timeout: u32,
    pub byte_cnt_max: usize,
}

impl Default for ReaderSession {
    fn default() -> Self {
        ReaderSession {
            pcb_block_num: 0,
            timeout: crate::constants::FWT_DEFAULT,
            byte_cnt_max: DEMOD_MAX_BYTES,
        }
    }
}

impl ReaderSession {
    pub fn set_timeout(&mut self, ticks: u32) {
        self.timeout = ticks.min(MAX_TIMEOUT);
    }
}

/// Bundles the collaborators a reader exchange needs so callers don't thread
/// four parameters through every method.
pub struct Reader<'a, R, C, S, T> {
    pub radio: &'a mut R,
    pub clock: &'a C,
    pub source: &'a mut S,
    pub trace: &'a mut T,
    demod: Demod,
    scratch: ToSend,
    response: [u8; DEMOD_MAX_BYTES],
    response_len: usize,
}

impl<'a, R, C, S, T> Reader<'a, R, C, S, T>
where
    R: RadioTx,
    C: Clock,
    S: IqSampleSource,
    T: TraceSink,
{
    pub fn new(radio: &'a mut R, clock: &'a C, source: &'a mut S, trace: &'a mut T) -> Self {
        Reader {
            radio,
            clock,
            source,
            trace,
            demod: Demod::new(),
            scratch: ToSend::new(),
            response: [0; DEMOD_MAX_BYTES],
            response_len: 0,
        }
    }

    /// Bytes of the tag's reply to the last exchange, with its trailing CRC
    /// stripped.
    pub fn last_response(&self) -> &[u8] {
        &self.response[..self.response_len]
    }

    /// Send `cmd` as a reader command, collect the tag's reply, verify its
    /// CRC, and store the CRC-stripped payload for `last_response`.
    ///
    /// Returns the outgoing command's `FrameTiming` so callers can schedule
    /// a following command `VCD_TO_VICC` ticks past its EOF.
    fn exchange(
        &mut self,
        session: &ReaderSession,
        cmd: &[u8],
        start_time: Ticks,
    ) -> Result<FrameTiming, ReaderError> {
        let timing = code_and_transmit_as_reader(
            self.radio,
            self.clock,
            self.trace,
            &mut self.scratch,
            cmd,
            start_time,
        );
        let answer = get_answer_from_tag(
            self.source,
            &mut self.demod,
            session.byte_cnt_max,
            session.timeout,
            timing.end,
        )?;
        let frame = &self.demod.bytes()[..answer.len];
        if !check_crc(frame) {
            return Err(ReaderError::Crc);
        }
        if frame.len() < 2 {
            return Err(ReaderError::Truncated);
        }
        let body_len = frame.len() - 2;
        self.response[..body_len].copy_from_slice(&frame[..body_len]);
        self.response_len = body_len;
        Ok(timing)
    }

    /// `WUPB` -> `ATQB` -> `ATTRIB`, assuming a single tag responds.
    pub fn select_card(
        &mut self,
        session: &mut ReaderSession,
        afi: u8,
        start_time: Ticks,
    ) -> Result<SelectedCard, ReaderError> {
        // WUPB: wake all cards, including halted ones.
        let mut wupb = [0x05u8, afi, 0x08, 0, 0];
        let len = append_crc(&mut wupb, 3);
        let wupb_timing = self.exchange(session, &wupb[..len], start_time)?;
        let atqb = self.last_response();
        if atqb.len() < 12 || atqb[0] != 0x50 {
            return Err(ReaderError::Truncated);
        }
        let mut uid = [0u8; 8];
        uid[..4].copy_from_slice(&atqb[1..5]);
        let mut protocol = [0u8; 7];
        protocol.copy_from_slice(&atqb[5..12]);

        // Protocol info byte 1 (protocol[5]): FSCI in the high nibble, the
        // nibble ATTRIB echoes back in its own byte 7 in the low nibble.
        // Protocol info byte 2 (protocol[6]): FWI in the high nibble.
        session.byte_cnt_max = decode_max_frame_size(protocol[5] >> 4) as usize;
        session.set_timeout(decode_fwi_timeout(protocol[6] >> 4));
        session.pcb_block_num = 0;

        let protocol_info_nibble = protocol[5] & 0x0F;
        let mut attrib = [0u8; 12];
        attrib[0] = 0x1D;
        attrib[1..5].copy_from_slice(&uid[..4]);
        attrib[5] = 0x00;
        attrib[6] = 0x08;
        attrib[7] = protocol_info_nibble;
        attrib[8] = 0x00;
        attrib[9] = 0x00;
        let len = append_crc(&mut attrib, 10);
        let attrib_start = wupb_timing.end.wrapping_add(inter_command_delay());
        self.exchange(session, &attrib[..len], attrib_start)?;
        let cid = self.last_response().first().copied().unwrap_or(0) & 0x0F;

        Ok(SelectedCard {
            uid,
            uid_len: 4,
            atqb: protocol,
            cid,
            chipid: 0,
        })
    }

    /// `INITIATE` -> `SELECT` -> `GET_UID` for the SRx card family.
    pub fn select_srx_card(
        &mut self,
        session: &mut ReaderSession,
        start_time: Ticks,
    ) -> Result<SelectedCard, ReaderError> {
        let mut initiate = [0x06u8, 0x00, 0, 0];
        let len = append_crc(&mut initiate, 2);
        let timing = self.exchange(session, &initiate[..len], start_time)?;
        let chipid = *self.last_response().first().ok_or(ReaderError::Truncated)?;

        // SELECT(chipid) echoes back `{chip_id}` plus CRC, confirming the
        // tag that answered INITIATE is still the one being addressed; it
        // does not carry the UID.
        let mut select = [0x0Eu8, chipid, 0, 0];
        let len = append_crc(&mut select, 2);
        let select_start = timing.end.wrapping_add(inter_command_delay());
        let timing = self.exchange(session, &select[..len], select_start)?;
        let confirmed_chipid = *self.last_response().first().ok_or(ReaderError::Truncated)?;
        if confirmed_chipid != chipid {
            return Err(ReaderError::ChipIdMismatch);
        }

        // GET_UID carries no parameter; its reply is the 8-byte UID.
        let mut get_uid = [0x0Bu8, 0, 0];
        let len = append_crc(&mut get_uid, 1);
        let get_uid_start = timing.end.wrapping_add(inter_command_delay());
        self.exchange(session, &get_uid[..len], get_uid_start)?;
        let uid_bytes = self.last_response();
        if uid_bytes.len() < 8 {
            return Err(ReaderError::Truncated);
        }
        let mut uid = [0u8; 8];
        uid.copy_from_slice(&uid_bytes[..8]);

        session.pcb_block_num = 0;
        Ok(SelectedCard {
            uid,
            uid_len: 8,
            atqb: [0; 7],
            cid: 0,
            chipid,
        })
    }

    /// Exchange one ISO 14443-4 I-block.
    ///
    /// A reply whose CRC fails to verify returns `Err(ReaderError::Crc)`
    /// rather than silently reporting success with a truncated payload.
    ///
    /// The block-number toggle bit is flipped unconditionally before every
    /// send, including a retried send after a failed exchange, rather than
    /// being gated on having received a valid ACK first.
    pub fn apdu(
        &mut self,
        session: &mut ReaderSession,
        payload: &[u8],
        start_time: Ticks,
    ) -> Result<usize, ReaderError> {
        let mut frame = [0u8; DEMOD_MAX_BYTES];
        frame[0] = 0x0A | session.pcb_block_num;
        session.pcb_block_num ^= 0x01;
        frame[1..1 + payload.len()].copy_from_slice(payload);
        let len = append_crc(&mut frame, 1 + payload.len());

        self.exchange(session, &frame[..len], start_time)?;
        let body = self.last_response();
        if body.is_empty() {
            return Err(ReaderError::Truncated);
        }
        let inf_len = body.len() - 1;
        Ok(inf_len)
    }

    /// Transmit `cmd` verbatim (the host is responsible for any CRC) and
    /// return the length of the CRC-verified, CRC-stripped reply available
    /// via `last_response`. Backs the host `RAW` command surface.
    pub fn raw_exchange(
        &mut self,
        session: &mut ReaderSession,
        cmd: &[u8],
        start_time: Ticks,
    ) -> Result<usize, ReaderError> {
        self.exchange(session, cmd, start_time)?;
        Ok(self.response_len)
    }

    /// Read one SRx memory block.
    pub fn read_st_block(
        &mut self,
        session: &mut ReaderSession,
        addr: u8,
        start_time: Ticks,
    ) -> Result<[u8; 4], ReaderError> {
        let mut cmd = [0x08u8, addr, 0, 0];
        let len = append_crc(&mut cmd, 2);
        self.exchange(session, &cmd[..len], start_time)?;
        let body = self.last_response();
        if body.len() < 4 {
            return Err(ReaderError::Truncated);
        }
        let mut block = [0u8; 4];
        block.copy_from_slice(&body[..4]);
        Ok(block)
    }
}

/// Frame delay reader drivers must observe before an ATTRIB, APDU, or
/// similar command.
pub fn inter_command_delay() -> u32 {
    VCD_TO_VICC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_max_frame_size_clamps_rfu_nibbles() {
        assert_eq!(decode_max_frame_size(0x0), 16);
        assert_eq!(decode_max_frame_size(0x8), 256);
        assert_eq!(decode_max_frame_size(0xF), 256);
    }

    #[test]
    fn decode_fwi_timeout_is_clamped() {
        assert_eq!(decode_fwi_timeout(0), 302);
        assert!(decode_fwi_timeout(14) <= MAX_TIMEOUT);
        assert_eq!(decode_fwi_timeout(14), MAX_TIMEOUT.min(302u32 << 14));
    }

    #[test]
    fn apdu_frame_has_expected_pcb_and_crc() {
        let mut frame = [0u8; 16];
        frame[0] = 0x0A;
        frame[1] = 0x11;
        let len = append_crc(&mut frame, 2);
        assert!(check_crc(&frame[..len]));
        assert_eq!(crc16(&frame[..2]).to_le_bytes(), [frame[2], frame[3]]);
    }
}
