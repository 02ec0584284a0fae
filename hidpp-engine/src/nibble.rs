//! A very simple u4/nibble implementation.
//!
//! HID++2.0 packs the function ID and the software ID into the two halves of
//! a single header byte, so both are represented as [`U4`].

/// Represents an unsigned 4-bit value (nibble) encoded as a byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct U4(u8);

impl U4 {
    /// The largest value a nibble can hold.
    pub const MAX: U4 = U4(0x0f);

    /// Constructs a nibble from a value that must fit into 4 bits.
    ///
    /// Returns [`None`] if `raw` is larger than `0x0f`.
    pub const fn new(raw: u8) -> Option<Self> {
        if raw > 0x0f { None } else { Some(Self(raw)) }
    }

    /// Constructs a nibble from the 4 low/rightmost bits of a byte.
    pub const fn from_lo(raw: u8) -> Self {
        Self(raw & 0x0f)
    }

    /// Constructs a nibble from the 4 high/leftmost bits of a byte.
    pub const fn from_hi(raw: u8) -> Self {
        Self(raw >> 4)
    }

    /// Returns the nibble as the 4 low/rightmost bits of a byte.
    pub const fn to_lo(self) -> u8 {
        self.0
    }

    /// Returns the nibble as the 4 high/leftmost bits of a byte.
    pub const fn to_hi(self) -> u8 {
        self.0 << 4
    }
}

/// Combines two nibbles to a byte, with `hi` being set to the 4 leftmost and
/// `lo` being set to the 4 rightmost bits.
pub const fn combine(hi: U4, lo: U4) -> u8 {
    hi.to_hi() | lo.to_lo()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_values_wider_than_four_bits() {
        assert_eq!(U4::new(0x0f), Some(U4::MAX));
        assert_eq!(U4::new(0x10), None);
    }

    #[test]
    fn combine_places_function_before_software_id() {
        let byte = combine(U4::from_lo(0x1), U4::from_lo(0xa));
        assert_eq!(byte, 0x1a);
        assert_eq!(U4::from_hi(byte), U4::from_lo(0x1));
        assert_eq!(U4::from_lo(byte), U4::from_lo(0xa));
    }
}
