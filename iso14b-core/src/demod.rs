//! Reader-side tag decoder (C2): recovers BPSK sub-carrier-modulated bits
//! from signed 8-bit I/Q sample pairs with no a-priori phase reference.

use crate::constants::SUBCARRIER_DETECT_THRESHOLD;

/// Largest tag response this decoder can capture in one frame.
pub const DEMOD_MAX_BYTES: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DemodState {
    Unsynced,
    PhaseRefTraining,
    AwaitingFallingEdgeOfSof,
    GotFallingEdgeOfSof,
    AwaitingStartBit,
    ReceivingData,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DemodError {
    /// A valid byte arrived but `max_len` was already reached.
    BufferOverflow,
    /// Decoded start/stop bits around a byte were invalid.
    FramingError,
}

fn sign(x: i32) -> i32 {
    match x {
        x if x > 0 => 1,
        x if x < 0 => -1,
        _ => 0,
    }
}

/// `max(|i|,|q|) + min(|i|,|q|)/2`, an L1/L-infinity blend approximating
/// `sqrt(i^2 + q^2)` without a square root.
fn amplitude(i: i8, q: i8) -> i32 {
    let ai = (i as i32).abs();
    let aq = (q as i32).abs();
    ai.max(aq) + ai.min(aq) / 2
}

pub struct Demod {
    state: DemodState,
    sum_i: i32,
    sum_q: i32,
    pos_count: u32,
    bit_count: u32,
    this_bit: i32,
    shift_reg: u16,
    len: usize,
    max_len: usize,
    output: [u8; DEMOD_MAX_BYTES],
}

impl Default for Demod {
    fn default() -> Self {
        Demod::new()
    }
}

impl Demod {
    pub fn new() -> Self {
        Demod {
            state: DemodState::Unsynced,
            sum_i: 0,
            sum_q: 0,
            pos_count: 0,
            bit_count: 0,
            this_bit: 0,
            shift_reg: 0,
            len: 0,
            max_len: DEMOD_MAX_BYTES,
            output: [0; DEMOD_MAX_BYTES],
        }
    }

    /// Reset to `UNSYNCED` with zeroed counters.
    /// `max_len` is clamped to this decoder's fixed capacity.
    pub fn reset(&mut self, max_len: usize) {
        self.state = DemodState::Unsynced;
        self.sum_i = 0;
        self.sum_q = 0;
        self.pos_count = 0;
        self.bit_count = 0;
        self.this_bit = 0;
        self.shift_reg = 0;
        self.len = 0;
        self.max_len = max_len.min(DEMOD_MAX_BYTES);
    }

    pub fn state(&self) -> DemodState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Bytes of the tag response captured so far.
    pub fn bytes(&self) -> &[u8] {
        &self.output[..self.len]
    }

    fn abort_to_unsynced(&mut self) {
        self.state = DemodState::Unsynced;
        self.sum_i = 0;
        self.sum_q = 0;
        self.pos_count = 0;
        self.bit_count = 0;
        self.this_bit = 0;
        self.shift_reg = 0;
    }

    fn soft_decision(&self, i: i8, q: i8) -> i32 {
        sign(self.sum_i) * (i as i32) + sign(self.sum_q) * (q as i32)
    }

    /// Feed one `(i, q)` correlator sample pair.
    ///
    /// Returns `Ok(true)` once a frame has ended (including a SOF-only
    /// frame with zero data bytes, accepted for compatibility), `Ok(false)`
    /// if more samples are needed, or `Err` on overflow or a framing error;
    /// both error paths leave the decoder in `UNSYNCED` with zeroed
    /// counters.
    pub fn receive(&mut self, i: i8, q: i8) -> Result<bool, DemodError> {
        match self.state {
            DemodState::Unsynced => {
                if amplitude(i, q) > SUBCARRIER_DETECT_THRESHOLD {
                    self.sum_i = i as i32;
                    self.sum_q = q as i32;
                    self.pos_count = 1;
                    self.state = DemodState::PhaseRefTraining;
                }
                Ok(false)
            }

            DemodState::PhaseRefTraining => {
                if amplitude(i, q) <= SUBCARRIER_DETECT_THRESHOLD {
                    self.abort_to_unsynced();
                    return Ok(false);
                }
                self.sum_i += i as i32;
                self.sum_q += q as i32;
                self.pos_count += 1;
                if self.pos_count == 8 {
                    self.state = DemodState::AwaitingFallingEdgeOfSof;
                    self.pos_count = 0;
                }
                Ok(false)
            }

            DemodState::AwaitingFallingEdgeOfSof => {
                let v = self.soft_decision(i, q);
                if v < 0 {
                    self.state = DemodState::GotFallingEdgeOfSof;
                    self.pos_count = 0;
                } else {
                    self.pos_count += 1;
                    if self.pos_count > 50 {
                        self.abort_to_unsynced();
                    }
                }
                Ok(false)
            }

            DemodState::GotFallingEdgeOfSof => {
                self.pos_count += 1;
                let v = self.soft_decision(i, q);
                if v > 0 {
                    if self.pos_count >= 18 {
                        self.state = DemodState::AwaitingStartBit;
                        self.pos_count = 0;
                        self.bit_count = 0;
                    } else {
                        self.abort_to_unsynced();
                    }
                } else if self.pos_count > 28 {
                    self.abort_to_unsynced();
                }
                Ok(false)
            }

            DemodState::AwaitingStartBit => {
                let v = self.soft_decision(i, q);
                if v > 0 {
                    self.pos_count += 1;
                    if self.pos_count > 12 {
                        let sof_only = self.len == 0 && self.bit_count == 0;
                        self.abort_to_unsynced();
                        if sof_only {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                } else if v < 0 {
                    self.this_bit = v;
                    self.pos_count = 1;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    self.state = DemodState::ReceivingData;
                    Ok(false)
                } else {
                    Ok(false)
                }
            }

            DemodState::ReceivingData => {
                self.pos_count += 1;
                let v = self.soft_decision(i, q);

                if self.pos_count % 2 == 1 {
                    self.this_bit = v;
                    return Ok(false);
                }

                self.this_bit += v;
                self.shift_reg >>= 1;
                if self.this_bit > 0 {
                    self.shift_reg |= 0x200;
                }
                self.bit_count += 1;

                if self.bit_count < 10 {
                    return Ok(false);
                }

                if self.shift_reg & 0x200 != 0 && self.shift_reg & 0x001 == 0 {
                    let byte = ((self.shift_reg >> 1) & 0xFF) as u8;
                    if self.len >= self.max_len {
                        self.abort_to_unsynced();
                        return Err(DemodError::BufferOverflow);
                    }
                    self.output[self.len] = byte;
                    self.len += 1;
                    self.state = DemodState::AwaitingStartBit;
                    self.pos_count = 0;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    Ok(false)
                } else if self.shift_reg == 0 {
                    self.state = DemodState::Unsynced;
                    Ok(true)
                } else {
                    self.abort_to_unsynced();
                    Err(DemodError::FramingError)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::code_as_tag;
    use crate::tosend::ToSend;

    /// Turn an encoded BPSK bit stream into (i, q) samples: two samples
    /// per bit, a phase-stable amplitude for logic 1 and its negation for
    /// logic 0, matching the soft-decision convention above.
    fn bits_to_iq(bits: impl Iterator<Item = bool>) -> heapless::Vec<(i8, i8), 8192> {
        let mut out = heapless::Vec::new();
        for bit in bits {
            let sample = if bit { 40i8 } else { -40i8 };
            let _ = out.push((sample, 0));
            let _ = out.push((sample, 0));
        }
        out
    }

    fn decode(cmd: &[u8]) -> heapless::Vec<u8, 64> {
        let mut ts = ToSend::new();
        code_as_tag(cmd, &mut ts);
        let samples = bits_to_iq(ts.bits());

        let mut demod = Demod::new();
        demod.reset(64);
        let mut got = heapless::Vec::new();
        for (i, q) in samples {
            match demod.receive(i, q) {
                Ok(true) => {
                    got.extend_from_slice(demod.bytes()).unwrap();
                    break;
                }
                Ok(false) => {}
                Err(_) => panic!("unexpected decode error"),
            }
        }
        got
    }

    #[test]
    fn round_trip_single_byte() {
        assert_eq!(decode(&[0x50]).as_slice(), &[0x50]);
    }

    #[test]
    fn round_trip_multi_byte() {
        let cmd = [0x50, 0x82, 0x0D, 0xE1, 0x74];
        assert_eq!(decode(&cmd).as_slice(), &cmd);
    }

    #[test]
    fn byte_cnt_never_exceeds_max() {
        let cmd = [0u8; 4];
        let mut ts = ToSend::new();
        code_as_tag(&cmd, &mut ts);
        let samples = bits_to_iq(ts.bits());

        let mut demod = Demod::new();
        demod.reset(2);
        let mut overflowed = false;
        for (i, q) in samples {
            match demod.receive(i, q) {
                Ok(_) => assert!(demod.len() <= 2),
                Err(DemodError::BufferOverflow) => {
                    overflowed = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert!(overflowed);
    }

    #[test]
    fn error_reset_leaves_unsynced_with_zeroed_counters() {
        let mut demod = Demod::new();
        demod.reset(8);
        // Feed pure noise below threshold; decoder should remain UNSYNCED.
        for _ in 0..32 {
            let _ = demod.receive(1, 1);
        }
        assert_eq!(demod.state(), DemodState::Unsynced);
        assert_eq!(demod.len(), 0);
    }
}
