//! Bit-stream encoders (C1). Both encoders write bits
//! MSB-first into a shared `ToSend` buffer.

use crate::tosend::ToSend;

/// Number of times each bit is repeated in the tag (BPSK) encoding to match
/// the 4x oversampling expected by the sub-carrier modulator.
const SUBCARRIER_OVERSAMPLE: usize = 4;

/// Encode a reader-to-tag command as an ASK/NRZ-L bit stream.
///
/// SOF is 10 zero bits then 2 one bits; each command byte is framed with a
/// zero start bit and a one stop bit around its 8 data bits, sent
/// LSB-first; EOF is 10 zero bits; the whole stream is padded with one
/// bits to a byte boundary.
pub fn code_as_reader(cmd: &[u8], out: &mut ToSend) {
    out.reset();

    for _ in 0..10 {
        out.stuff_bit(false);
    }
    for _ in 0..2 {
        out.stuff_bit(true);
    }

    for &byte in cmd {
        out.stuff_bit(false);
        for i in 0..8 {
            out.stuff_bit((byte >> i) & 1 != 0);
        }
        out.stuff_bit(true);
    }

    for _ in 0..10 {
        out.stuff_bit(false);
    }

    out.pad_to_byte();
    out.finish();
}

fn stuff4(out: &mut ToSend, bit: bool) {
    for _ in 0..SUBCARRIER_OVERSAMPLE {
        out.stuff_bit(bit);
    }
}

/// Encode a tag-to-reader command as a BPSK sub-carrier bit stream, with
/// every bit repeated 4x.
///
/// Preamble is a 20-unit TR1 burst of ones, then SOF (10 zero units, 2 one
/// units). Each byte is framed like the reader encoding. The trailer is 10
/// zero units (EOF) followed by 2 one units.
///
/// The 2 trailing one-units after EOF are not called for by any Type B
/// framing rule; no iso14443-2 spec section requires them, but real BPSK
/// decoders in the field expect them, so they are kept.
pub fn code_as_tag(cmd: &[u8], out: &mut ToSend) {
    out.reset();

    for _ in 0..20 {
        stuff4(out, true);
    }
    for _ in 0..10 {
        stuff4(out, false);
    }
    for _ in 0..2 {
        stuff4(out, true);
    }

    for &byte in cmd {
        stuff4(out, false);
        for i in 0..8 {
            stuff4(out, (byte >> i) & 1 != 0);
        }
        stuff4(out, true);
    }

    for _ in 0..10 {
        stuff4(out, false);
    }
    for _ in 0..2 {
        stuff4(out, true);
    }

    out.pad_to_byte();
    out.finish();
}
