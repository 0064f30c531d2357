//! Reader field presence sense, used by the tag emulator's NOFIELD/IDLE
//! transition.

/// Whether an external reader field is currently present.
pub trait FieldSense {
    /// True once the sensed field voltage is above the detection threshold.
    fn field_present(&self) -> bool;
}
