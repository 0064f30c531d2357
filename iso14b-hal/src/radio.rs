//! Radio transmit line, abstracting the FPGA bitstream/register interface
//! named as out of scope in the system overview.

/// Which sub-carrier modulation the next transmission uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    /// Reader-to-tag: on/off-keyed carrier, NRZ-L encoded.
    Ask,
    /// Tag-to-reader: binary phase-shift-keyed sub-carrier.
    Bpsk,
}

/// The transmit side of the radio.
///
/// The reader TX path writes one 16-bit word per encoded bit (`0x0000` for
/// a 1, `0xFFFF` for a 0) to a TX register; that register-level behaviour
/// is captured here as `send_bit` so the core never depends on a specific
/// register layout.
pub trait RadioTx {
    /// Select ASK (reader) or BPSK (tag) modulation for the next frame.
    fn set_modulation(&mut self, modulation: Modulation);

    /// Transmit a single encoded bit. Implementations busy-wait for the TX
    /// peripheral to be ready before accepting the bit, matching the
    /// transceiver's TX-ready suspension point.
    fn send_bit(&mut self, bit: bool);

    /// Block until the last `send_bit` has fully left the peripheral.
    fn flush(&mut self);
}
