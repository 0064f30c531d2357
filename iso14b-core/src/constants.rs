//! Timing and sizing constants from the ISO 14443-3/4 Type B air interface.
//! All tick values are sub-carrier clock ticks unless noted otherwise.

/// Reader transmit scheduling delay applied before arming the radio.
pub const ARM_TO_TAG_DELAY: u32 = 16;

/// Delay applied when deriving a tag response's start-of-frame timestamp
/// from its end-of-frame timestamp.
pub const TAG_TO_ARM_DELAY: u32 = 32;

/// PICC-to-PCD frame delay time guard.
pub const VICC_TO_VCD: u32 = 600;

/// PCD-to-PICC frame delay time guard, applied before ATTRIB/APDU/etc.
pub const VCD_TO_VICC: u32 = 600;

/// Sample budget for a reader waiting on a tag reply before any carrier has
/// even been detected, used before a session timeout has been negotiated.
pub const DEFAULT_RESPONSE_TIMEOUT_SAMPLES: u32 = 1700;

/// Default frame-waiting-time, used as the initial `ReaderSession` timeout
/// before ATQB negotiation sets one from FWI.
pub const FWT_DEFAULT: u32 = 35312;

/// Upper bound any negotiated or host-requested timeout is clamped to.
pub const MAX_TIMEOUT: u32 = 40_500_000;

/// Upper bound any negotiated maximum frame size is clamped to.
///
/// The original clamp checks `> 256` then assigns this constant, which is
/// itself 256, i.e. a "clamp at 256" written oddly. Preserved literally.
pub const MAX_FRAME_SIZE: u16 = 256;

/// BPSK sub-carrier amplitude above which the reader-side demodulator
/// considers the sub-carrier present.
pub const SUBCARRIER_DETECT_THRESHOLD: i32 = 8;

/// All TX slot alignments are forced to multiples of this many ticks.
pub const TX_SLOT_ALIGN: u32 = 16;
