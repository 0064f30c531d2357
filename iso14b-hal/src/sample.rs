//! Sample feed abstraction, standing in for the DMA/SSC buffer machinery
//! named as out of scope in the system overview.

/// One correlator output pair from the reader-side demodulator front end.
///
/// Signed 8-bit in-phase/quadrature samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IqSample {
    pub i: i8,
    pub q: i8,
}

impl IqSample {
    pub fn new(i: i8, q: i8) -> Self {
        IqSample { i, q }
    }

    /// Halve both components, used by the sniffer to attenuate the tag
    /// decoder's input while a reader frame is in flight.
    pub fn halved(self) -> Self {
        IqSample {
            i: self.i / 2,
            q: self.q / 2,
        }
    }
}

/// A streaming source of `(i, q)` correlator samples, one pair per call,
/// standing in for the DMA-filled ring buffer drained by the receive loop.
pub trait IqSampleSource {
    /// Blocks until the next sample pair is available from the ring.
    fn next_sample(&mut self) -> IqSample;
}

/// A streaming source of 1-bit sliced reader samples at 4x oversampling,
/// standing in for the same ring buffer in tag-emulation/sniffer contexts.
pub trait BitSampleSource {
    /// Blocks until the next sliced sample bit is available from the ring.
    fn next_bit(&mut self) -> bool;
}
