//! Passive sniffer (C7): runs the tag-side reader decoder
//! (C3) and the reader-side tag decoder (C2) concurrently off the same RF
//! stream, attenuating the tag decoder's input while a reader frame is in
//! flight so the far stronger reader signal doesn't swamp it.

use crate::crc::check_crc;
use crate::demod::{Demod, DemodState, DEMOD_MAX_BYTES};
use crate::uart::{Uart, UartState, UART_MAX_BYTES};
use iso14b_hal::{
    BitSampleSource, Clock, Direction, HostCancel, IqSampleSource, NullLed, Ticks, TraceRecord, TraceSink,
};

/// Approximate per-byte tick cost used only for the trace's derived SOF
/// timestamp; the sniffer has no access to the encoder's exact timing.
const SNIFFER_BYTE_TICKS: u32 = 1;
/// Fixed SOF/preamble + EOF overhead folded into the derived SOF timestamp.
const SNIFFER_SOF_OVERHEAD: u32 = 32 * 16 + 16 * 16;

fn derive_sof_time(eof: Ticks, byte_cnt: usize) -> Ticks {
    Ticks(
        eof.0
            .wrapping_sub(byte_cnt as u32 * SNIFFER_BYTE_TICKS)
            .wrapping_sub(SNIFFER_SOF_OVERHEAD),
    )
}

pub struct Sniffer<'a, B, S, C, T, Cncl> {
    bits: &'a mut B,
    iq: &'a mut S,
    clock: &'a C,
    trace: &'a mut T,
    cancel: &'a Cncl,
    uart: Uart,
    demod: Demod,
    reader_is_active: bool,
    tag_is_active: bool,
    expect_tag_answer: bool,
}

impl<'a, B, S, C, T, Cncl> Sniffer<'a, B, S, C, T, Cncl>
where
    B: BitSampleSource,
    S: IqSampleSource,
    C: Clock,
    T: TraceSink,
    Cncl: HostCancel,
{
    pub fn new(bits: &'a mut B, iq: &'a mut S, clock: &'a C, trace: &'a mut T, cancel: &'a Cncl) -> Self {
        let mut uart = Uart::new();
        uart.reset(UART_MAX_BYTES);
        let mut demod = Demod::new();
        demod.reset(DEMOD_MAX_BYTES);
        Sniffer {
            bits,
            iq,
            clock,
            trace,
            cancel,
            uart,
            demod,
            reader_is_active: false,
            tag_is_active: false,
            expect_tag_answer: false,
        }
    }

    /// Run until `HostCancel` fires, recording one `TraceRecord` per
    /// completed reader or tag frame.
    pub fn run(&mut self) {
        while !self.cancel.cancelled() {
            self.step();
        }
    }

    /// Process one reader bit and one tag (i, q) sample. Exposed separately
    /// from `run` so tests can drive a fixed-length sample sequence.
    pub fn step(&mut self) {
        let bit = self.bits.next_bit();
        let sample = self.iq.next_sample();
        let sample = if self.reader_is_active { sample.halved() } else { sample };

        let mut led = NullLed;
        match self.uart.receive(bit, &mut led) {
            Ok(true) => {
                let now = self.clock.now();
                let byte_cnt = self.uart.bytes().len();
                let crc_ok = Some(check_crc(self.uart.bytes()));
                let sof = derive_sof_time(now, byte_cnt);
                self.trace
                    .record(TraceRecord::new(self.uart.bytes(), sof, now, crc_ok, Direction::Reader));
                self.reader_is_active = false;
                self.expect_tag_answer = true;
                self.uart.reset(UART_MAX_BYTES);
            }
            Ok(false) => {
                self.reader_is_active = self.uart.state() != UartState::Unsynced;
            }
            Err(_) => {
                self.reader_is_active = false;
                self.uart.reset(UART_MAX_BYTES);
            }
        }

        if !self.expect_tag_answer {
            return;
        }

        match self.demod.receive(sample.i, sample.q) {
            Ok(true) => {
                let now = self.clock.now();
                let byte_cnt = self.demod.bytes().len();
                let crc_ok = Some(check_crc(self.demod.bytes()));
                let sof = derive_sof_time(now, byte_cnt);
                self.trace
                    .record(TraceRecord::new(self.demod.bytes(), sof, now, crc_ok, Direction::Tag));
                self.tag_is_active = false;
                self.expect_tag_answer = false;
                self.demod.reset(DEMOD_MAX_BYTES);
            }
            Ok(false) => {
                self.tag_is_active = self.demod.state() != DemodState::Unsynced;
            }
            Err(_) => {
                self.tag_is_active = false;
                self.expect_tag_answer = false;
                self.demod.reset(DEMOD_MAX_BYTES);
            }
        }
    }
}
