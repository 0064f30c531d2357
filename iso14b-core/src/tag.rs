//! Tag emulator (C6): drives a single simulated PICC through
//! field sense, selection, and I-block exchange using the tag-side decoder
//! (C3) and BPSK encoder (C1).

use crate::crc::{append_crc, check_crc};
use crate::encode::code_as_tag;
use crate::tosend::ToSend;
use crate::transceiver::transmit_as_tag;
use crate::uart::{Uart, UartError, UART_MAX_BYTES};
use iso14b_hal::{BitSampleSource, Clock, FieldSense, NullLed, RadioTx, Ticks, TraceSink};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardState {
    NoField,
    Idle,
    Halted,
    Selecting,
    Halting,
    Acknowledge,
    Work,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TagError {
    Crc,
    Framing,
    Overflow,
}

impl From<UartError> for TagError {
    fn from(e: UartError) -> Self {
        match e {
            UartError::FramingError => TagError::Framing,
            UartError::BufferOverflow => TagError::Overflow,
        }
    }
}

const REQB_WUPB: u8 = 0x05;
const ATTRIB: u8 = 0x1D;
const HLTB: u8 = 0x50;
/// I-block PCB with the block-number toggle bit masked off, matching the
/// `0x0A | pcb_block_num` prefix `reader::apdu` sends.
const IBLOCK_PCB_BASE: u8 = 0x0A;
const IBLOCK_PCB_MASK: u8 = 0xFE;

/// Build the 12-byte ATQB body: `0x50`, `pupi`, 4 bytes of
/// application data (unused by this emulator), and 3 bytes of protocol info.
/// Protocol info byte 1 carries FSCI in its high nibble and the nibble
/// ATTRIB echoes back in its low nibble; byte 2 carries FWI in its high
/// nibble, matching how `reader::decode_max_frame_size`/`decode_fwi_timeout`
/// unpack them.
fn build_atqb(pupi: [u8; 4]) -> [u8; 12] {
    let mut body = [0u8; 12];
    body[0] = 0x50;
    body[1..5].copy_from_slice(&pupi);
    // app_data[4] left zeroed.
    body[9] = 0x00; // bit rate capability: 106 kbps both directions only
    body[10] = (8u8 << 4) | 0; // FSCI=8 (256 bytes, clamped reader-side)
    body[11] = 4u8 << 4; // FWI=4
    body
}

pub struct Tag<'a, R, C, Sns, B, T> {
    pub radio: &'a mut R,
    pub clock: &'a C,
    pub sense: &'a Sns,
    pub bits: &'a mut B,
    pub trace: &'a mut T,
    uart: Uart,
    state: CardState,
    pupi: [u8; 4],
    scratch: ToSend,
}

impl<'a, R, C, Sns, B, T> Tag<'a, R, C, Sns, B, T>
where
    R: RadioTx,
    C: Clock,
    Sns: FieldSense,
    B: BitSampleSource,
    T: TraceSink,
{
    pub fn new(radio: &'a mut R, clock: &'a C, sense: &'a Sns, bits: &'a mut B, trace: &'a mut T, pupi: [u8; 4]) -> Self {
        let mut uart = Uart::new();
        uart.reset(UART_MAX_BYTES);
        Tag {
            radio,
            clock,
            sense,
            bits,
            trace,
            uart,
            state: CardState::NoField,
            pupi,
            scratch: ToSend::new(),
        }
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    fn send(&mut self, body: &[u8]) {
        let mut frame = [0u8; UART_MAX_BYTES];
        frame[..body.len()].copy_from_slice(body);
        let len = append_crc(&mut frame, body.len());
        code_as_tag(&frame[..len], &mut self.scratch);
        let _ = transmit_as_tag(self.radio, self.clock, &self.scratch, self.clock.now());
    }

    /// Consume one sliced reader bit; dispatches a completed frame once one
    /// arrives. Call in a tight loop fed by a streaming `BitSampleSource`.
    pub fn poll(&mut self) -> Result<(), TagError> {
        if !self.sense.field_present() {
            if self.state != CardState::NoField {
                self.state = CardState::NoField;
                self.uart.reset(UART_MAX_BYTES);
            }
            return Ok(());
        }
        if self.state == CardState::NoField {
            self.state = CardState::Idle;
            self.uart.reset(UART_MAX_BYTES);
        }

        let bit = self.bits.next_bit();
        let mut led = NullLed;
        match self.uart.receive(bit, &mut led) {
            Ok(true) => {
                let mut frame = [0u8; UART_MAX_BYTES];
                let len = self.uart.bytes().len();
                frame[..len].copy_from_slice(self.uart.bytes());
                self.uart.reset(UART_MAX_BYTES);
                self.handle_frame(&frame[..len])
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.uart.reset(UART_MAX_BYTES);
                Err(e.into())
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<(), TagError> {
        if frame.len() < 2 || !check_crc(frame) {
            return Err(TagError::Crc);
        }
        let cmd = &frame[..frame.len() - 2];

        match self.state {
            CardState::Idle => self.handle_reqb_wupb(cmd, true),
            CardState::Halted => self.handle_reqb_wupb(cmd, false),
            CardState::Selecting => self.handle_attrib(cmd),
            CardState::Acknowledge | CardState::Work => self.handle_selected(cmd),
            CardState::NoField | CardState::Halting => Ok(()),
        }
    }

    fn handle_reqb_wupb(&mut self, cmd: &[u8], accept_reqb: bool) -> Result<(), TagError> {
        if cmd.len() != 3 || cmd[0] != REQB_WUPB {
            return Ok(());
        }
        let is_wupb = cmd[2] & 0x08 != 0;
        if !is_wupb && !accept_reqb {
            // HALTED ignores REQB; only WUPB wakes a halted card.
            return Ok(());
        }
        let body = build_atqb(self.pupi);
        self.send(&body);
        self.state = CardState::Selecting;
        Ok(())
    }

    fn handle_attrib(&mut self, cmd: &[u8]) -> Result<(), TagError> {
        if cmd.len() < 5 || cmd[0] != ATTRIB || cmd[1..5] != self.pupi[..] {
            return Ok(());
        }
        self.send(&[0x00]);
        self.state = CardState::Acknowledge;
        Ok(())
    }

    fn handle_selected(&mut self, cmd: &[u8]) -> Result<(), TagError> {
        if cmd.len() == 5 && cmd[0] == HLTB && cmd[1..5] == self.pupi[..] {
            self.send(&[0x00]);
            self.state = CardState::Halted;
            return Ok(());
        }
        if !cmd.is_empty() && cmd[0] & IBLOCK_PCB_MASK == IBLOCK_PCB_BASE {
            // Loopback I-block: echo the PCB and payload unchanged. A real
            // application layer would dispatch on the payload instead.
            self.send(cmd);
            self.state = CardState::Work;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::Demod;
    use crate::transceiver::get_answer_from_tag;
    use iso14b_hal::IqSample;

    struct MockClock;
    impl Clock for MockClock {
        fn now(&self) -> Ticks {
            Ticks(0)
        }
        fn wait_until(&self, _deadline: Ticks) {}
    }

    struct MockRadio {
        iq_out: heapless::Vec<IqSample, 8192>,
    }
    impl RadioTx for MockRadio {
        fn set_modulation(&mut self, _m: iso14b_hal::Modulation) {}
        fn send_bit(&mut self, bit: bool) {
            let v = if bit { 40i8 } else { -40i8 };
            let _ = self.iq_out.push(IqSample::new(v, 0));
            let _ = self.iq_out.push(IqSample::new(v, 0));
        }
        fn flush(&mut self) {}
    }

    struct AlwaysField;
    impl FieldSense for AlwaysField {
        fn field_present(&self) -> bool {
            true
        }
    }

    struct FixedBits {
        bits: heapless::Vec<bool, 4096>,
        idx: usize,
    }
    impl BitSampleSource for FixedBits {
        fn next_bit(&mut self) -> bool {
            let b = self.bits.get(self.idx).copied().unwrap_or(true);
            self.idx += 1;
            b
        }
    }

    struct NullTrace;
    impl TraceSink for NullTrace {
        fn record(&mut self, _r: iso14b_hal::TraceRecord) {}
    }

    fn reader_frame_bits(cmd: &[u8]) -> heapless::Vec<bool, 4096> {
        let mut ts = ToSend::new();
        crate::encode::code_as_reader(cmd, &mut ts);
        let mut out = heapless::Vec::new();
        for bit in ts.bits() {
            for _ in 0..4 {
                let _ = out.push(bit);
            }
        }
        out
    }

    #[test]
    fn wupb_moves_idle_tag_to_selecting_and_emits_atqb() {
        let clock = MockClock;
        let sense = AlwaysField;
        let mut radio = MockRadio { iq_out: heapless::Vec::new() };
        let mut trace = NullTrace;
        let pupi = [0x11, 0x22, 0x33, 0x44];

        let mut wupb = [0x05u8, 0x00, 0x08, 0, 0];
        let len = append_crc(&mut wupb, 3);
        let mut bits = FixedBits { bits: reader_frame_bits(&wupb[..len]), idx: 0 };

        {
            let mut tag = Tag::new(&mut radio, &clock, &sense, &mut bits, &mut trace, pupi);
            assert_eq!(tag.state(), CardState::NoField);
            for _ in 0..bits_len(&wupb[..len]) {
                tag.poll().unwrap();
            }
            assert_eq!(tag.state(), CardState::Selecting);
        }

        let mut demod = Demod::new();
        let mut source = IqVecSource { samples: radio.iq_out, idx: 0 };
        let answer = get_answer_from_tag(&mut source, &mut demod, 32, 10_000, Ticks(0)).unwrap();
        let body = demod.bytes();
        assert_eq!(answer.len, body.len());
        assert_eq!(body[0], 0x50);
        assert_eq!(&body[1..5], &pupi);
    }

    fn bits_len(cmd: &[u8]) -> usize {
        let mut ts = ToSend::new();
        crate::encode::code_as_reader(cmd, &mut ts);
        ts.bits().count() * 4 + 64 // generous margin past EOF for state settling
    }

    struct IqVecSource {
        samples: heapless::Vec<IqSample, 8192>,
        idx: usize,
    }
    impl iso14b_hal::IqSampleSource for IqVecSource {
        fn next_sample(&mut self) -> IqSample {
            let s = self.samples.get(self.idx).copied().unwrap_or_default();
            self.idx += 1;
            s
        }
    }

    #[test]
    fn halted_ignores_reqb_but_accepts_wupb() {
        let clock = MockClock;
        let sense = AlwaysField;
        let mut radio = MockRadio { iq_out: heapless::Vec::new() };
        let mut trace = NullTrace;
        let pupi = [0u8; 4];
        let mut bits = FixedBits { bits: heapless::Vec::new(), idx: 0 };
        let mut tag = Tag::new(&mut radio, &clock, &sense, &mut bits, &mut trace, pupi);
        tag.state = CardState::Halted;

        let mut reqb = [0x05u8, 0x00, 0x00, 0, 0];
        let len = append_crc(&mut reqb, 3);
        tag.handle_frame(&reqb[..len]).unwrap();
        assert_eq!(tag.state(), CardState::Halted, "REQB must not wake a halted tag");

        let mut wupb = [0x05u8, 0x00, 0x08, 0, 0];
        let len = append_crc(&mut wupb, 3);
        tag.handle_frame(&wupb[..len]).unwrap();
        assert_eq!(tag.state(), CardState::Selecting, "WUPB must wake a halted tag");
    }
}
