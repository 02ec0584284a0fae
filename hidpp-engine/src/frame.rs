//! Implements the HID++ wire framing shared by both protocol generations.
//!
//! Every HID++ report starts with the same 4-byte header:
//!
//! | byte | meaning                                                        |
//! |------|----------------------------------------------------------------|
//! | 0    | report ID (`0x10` short, `0x11` long, `0x12` very long)        |
//! | 1    | device index                                                   |
//! | 2    | sub ID (HID++1.0) or feature index (HID++2.0)                  |
//! | 3    | register address (HID++1.0) or function & software ID (2.0)   |
//!
//! The remaining bytes are parameters, zero-padded to the fixed payload size
//! of the report.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::nibble::U4;

pub const SHORT_REPORT_ID: u8 = 0x10;
pub const LONG_REPORT_ID: u8 = 0x11;
pub const VERY_LONG_REPORT_ID: u8 = 0x12;

pub const SHORT_REPORT_LENGTH: usize = 7;
pub const LONG_REPORT_LENGTH: usize = 20;
pub const VERY_LONG_REPORT_LENGTH: usize = 64;

/// The length of the header every report starts with.
pub const HEADER_LENGTH: usize = 4;

/// The largest parameter payload any report can carry.
pub const MAX_PAYLOAD_LENGTH: usize = VERY_LONG_REPORT_LENGTH - HEADER_LENGTH;

/// Represents one of the three fixed report sizes HID++ uses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ReportKind {
    /// 7 bytes on the wire, 3 bytes of parameters.
    Short = 0x10,

    /// 20 bytes on the wire, 16 bytes of parameters.
    Long = 0x11,

    /// 64 bytes on the wire, 60 bytes of parameters.
    VeryLong = 0x12,
}

impl ReportKind {
    /// All report kinds, ordered from the smallest to the largest.
    pub const ALL: [ReportKind; 3] = [ReportKind::Short, ReportKind::Long, ReportKind::VeryLong];

    /// The report ID written into byte 0.
    pub fn report_id(self) -> u8 {
        self.into()
    }

    /// The total length of the report on the wire.
    pub const fn frame_length(self) -> usize {
        match self {
            ReportKind::Short => SHORT_REPORT_LENGTH,
            ReportKind::Long => LONG_REPORT_LENGTH,
            ReportKind::VeryLong => VERY_LONG_REPORT_LENGTH,
        }
    }

    /// The amount of parameter bytes following the header.
    pub const fn payload_length(self) -> usize {
        self.frame_length() - HEADER_LENGTH
    }

    /// Checks whether the report can carry `len` bytes of parameters.
    pub const fn can_carry(self, len: usize) -> bool {
        len <= self.payload_length()
    }
}

/// Represents the header that starts every HID++ report.
///
/// Two headers correlate (a response belongs to a request) if everything but
/// the report kind is equal, see [`FrameHeader::correlates`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FrameHeader {
    /// The size of the report carrying the header.
    pub report_kind: ReportKind,

    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The sub ID of a HID++1.0 message or the feature index of a HID++2.0
    /// message.
    pub sub_id_or_feature_index: u8,

    /// The register address of a HID++1.0 message or the function (leftmost
    /// 4 bits) and software (rightmost 4 bits) IDs of a HID++2.0 message.
    pub address_or_function: u8,
}

impl FrameHeader {
    /// Tries to read the header of a raw report.
    ///
    /// Returns [`None`] if the data is too short to contain a header or if the
    /// report ID is not a HID++ one.
    pub fn read(frame: &[u8]) -> Option<Self> {
        if frame.len() < HEADER_LENGTH {
            return None;
        }

        Some(Self {
            report_kind: ReportKind::try_from(frame[0]).ok()?,
            device_index: frame[1],
            sub_id_or_feature_index: frame[2],
            address_or_function: frame[3],
        })
    }

    /// Writes the header into the first [`HEADER_LENGTH`] bytes of a buffer.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = self.report_kind.report_id();
        buf[1] = self.device_index;
        buf[2] = self.sub_id_or_feature_index;
        buf[3] = self.address_or_function;
    }

    /// Checks whether two headers describe the same logical exchange.
    ///
    /// The report kind is ignored, as a device may answer in a larger report
    /// than the one the request was sent in.
    pub fn correlates(&self, other: &FrameHeader) -> bool {
        self.device_index == other.device_index
            && self.sub_id_or_feature_index == other.sub_id_or_feature_index
            && self.address_or_function == other.address_or_function
    }

    /// Interprets the low nibble of byte 3 as a HID++2.0 software ID.
    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.address_or_function)
    }
}

/// The fixed sizes request and response parameter blocks may have.
///
/// A parameter block can be carried by every report whose payload is at least
/// as large as the block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ParameterLength {
    /// 3 bytes, fits every report.
    Short,

    /// 16 bytes, fits long and very long reports.
    Long,

    /// 60 bytes, fits very long reports only.
    VeryLong,
}

impl ParameterLength {
    /// The length of the block in bytes.
    pub const fn len(self) -> usize {
        match self {
            ParameterLength::Short => ReportKind::Short.payload_length(),
            ParameterLength::Long => ReportKind::Long.payload_length(),
            ParameterLength::VeryLong => ReportKind::VeryLong.payload_length(),
        }
    }
}

/// Represents a fixed-size block of request or response parameters.
///
/// The length is declared as an associated constant, so an implementation with
/// an unsupported size cannot be expressed at all.
pub trait Parameters: Sized + Send + 'static {
    /// The length of the block.
    const LENGTH: ParameterLength;

    /// Decodes the block from exactly [`ParameterLength::len`] bytes.
    fn read_from(payload: &[u8]) -> Self;

    /// Encodes the block into exactly [`ParameterLength::len`] bytes.
    fn write_to(&self, payload: &mut [u8]);
}

macro_rules! impl_array_parameters {
    ($len:expr, $variant:ident) => {
        impl Parameters for [u8; $len] {
            const LENGTH: ParameterLength = ParameterLength::$variant;

            fn read_from(payload: &[u8]) -> Self {
                let mut data = [0u8; $len];
                data.copy_from_slice(payload);
                data
            }

            fn write_to(&self, payload: &mut [u8]) {
                payload.copy_from_slice(self);
            }
        }
    };
}

impl_array_parameters!(3, Short);
impl_array_parameters!(16, Long);
impl_array_parameters!(60, VeryLong);

/// Fits a received payload into a block of the declared length.
///
/// Payloads of the exact length are copied as they are. Longer payloads are
/// truncated and shorter ones are zero-extended.
pub fn fit_payload(payload: &[u8], length: ParameterLength) -> Box<[u8]> {
    let mut data = vec![0u8; length.len()].into_boxed_slice();
    let count = payload.len().min(data.len());
    data[..count].copy_from_slice(&payload[..count]);
    data
}

/// Represents a report that was not matched to any pending request and was
/// forwarded as a notification.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Notification {
    /// The header of the report.
    pub header: FrameHeader,

    /// The parameters following the header.
    pub payload: Box<[u8]>,
}

impl Notification {
    /// Copies a raw report into an owned notification.
    pub fn read(frame: &[u8]) -> Option<Self> {
        let header = FrameHeader::read(frame)?;

        Some(Self {
            header,
            payload: frame[HEADER_LENGTH..].into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_differing_only_in_report_kind_correlate() {
        let short = FrameHeader {
            report_kind: ReportKind::Short,
            device_index: 0x05,
            sub_id_or_feature_index: 0x51,
            address_or_function: 0x00,
        };
        let long = FrameHeader {
            report_kind: ReportKind::Long,
            ..short
        };

        assert!(short.correlates(&long));
        assert_ne!(short, long);
    }

    #[test]
    fn headers_differing_in_any_addressing_byte_do_not_correlate() {
        let base = FrameHeader {
            report_kind: ReportKind::Short,
            device_index: 0x05,
            sub_id_or_feature_index: 0x51,
            address_or_function: 0x00,
        };

        for other in [
            FrameHeader { device_index: 0x06, ..base },
            FrameHeader { sub_id_or_feature_index: 0x52, ..base },
            FrameHeader { address_or_function: 0x01, ..base },
        ] {
            assert!(!base.correlates(&other));
        }
    }

    #[test]
    fn read_rejects_unknown_report_ids_and_truncated_headers() {
        assert_eq!(FrameHeader::read(&[0x20, 0x01, 0x02, 0x03]), None);
        assert_eq!(FrameHeader::read(&[0x10, 0x01, 0x02]), None);
        assert_eq!(
            FrameHeader::read(&[0x12, 0x01, 0x02, 0x03]).map(|h| h.report_kind),
            Some(ReportKind::VeryLong)
        );
    }

    #[test]
    fn fit_payload_truncates_and_zero_extends() {
        assert_eq!(&*fit_payload(&[1, 2, 3], ParameterLength::Short), &[1, 2, 3]);
        assert_eq!(
            &*fit_payload(&[1, 2, 3, 4, 5], ParameterLength::Short),
            &[1, 2, 3]
        );

        let extended = fit_payload(&[9, 8, 7], ParameterLength::Long);
        assert_eq!(extended.len(), 16);
        assert_eq!(&extended[..3], &[9, 8, 7]);
        assert!(extended[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reports_carry_parameters_up_to_their_payload_length() {
        assert!(ReportKind::Short.can_carry(ParameterLength::Short.len()));
        assert!(ReportKind::Long.can_carry(ParameterLength::Short.len()));
        assert!(ReportKind::VeryLong.can_carry(ParameterLength::Long.len()));
        assert!(!ReportKind::Short.can_carry(ParameterLength::Long.len()));
        assert!(!ReportKind::Long.can_carry(17));
        assert!(ReportKind::VeryLong.can_carry(MAX_PAYLOAD_LENGTH));
    }
}
