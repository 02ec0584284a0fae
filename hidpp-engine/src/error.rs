//! Error types shared by the transport and everything built on top of it.

use std::io;

use thiserror::Error;

use crate::protocol::{ProtocolFlavor, fap, rap};

/// Represents an error that occurred while exchanging HID++ messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HidppError {
    /// Indicates that no open stream can carry a payload of the given length.
    ///
    /// This is a caller or configuration error and is raised before anything
    /// is written.
    #[error("no available report can carry {length} bytes of parameters")]
    NoSuitableReport {
        /// The length of the rejected payload.
        length: usize,
    },

    /// Indicates that a transport was created without any stream.
    #[error("at least one HID stream is required")]
    NoStreams,

    /// Indicates that the configured software ID is not in `1..=15`.
    #[error("the software ID {0:#04x} is not in the range 1..=15")]
    InvalidSoftwareId(u8),

    /// Indicates that a HID++1.0 device answered with an error message.
    #[error("the device returned the HID++1.0 error {0:?}")]
    RegisterAccess(rap::ErrorCode),

    /// Indicates that a HID++2.0 device answered with an error message.
    #[error("the device returned the HID++2.0 error {0:?}")]
    FeatureAccess(fap::ErrorCode),

    /// Indicates that no response arrived within the request timeout.
    #[error("the device did not respond in time")]
    Timeout,

    /// Indicates that the caller cancelled the operation.
    #[error("the operation was cancelled")]
    Cancelled,

    /// Indicates that the transport stopped reading and cannot complete any
    /// further requests.
    #[error("the transport is closed")]
    TransportClosed,

    /// Indicates that writing to the underlying stream failed.
    #[error("the HID stream returned an error")]
    Io(#[from] io::Error),

    /// Indicates that a response did not have the expected shape.
    #[error("the device returned an unexpected response")]
    UnexpectedResponse,
}

impl HidppError {
    /// Checks whether the error is a busy indication from either protocol
    /// generation.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            HidppError::RegisterAccess(rap::ErrorCode::Busy)
                | HidppError::FeatureAccess(fap::ErrorCode::Busy)
        )
    }
}

/// Represents an error raised while creating or managing a device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// Indicates that talking to the device failed.
    #[error("a HID++ error occurred")]
    Protocol(#[from] HidppError),

    /// Indicates that the specified device index points to no device.
    #[error("there is no device with the specified device index")]
    DeviceNotFound,

    /// Indicates that the device speaks a HID++2.0 version this crate does not
    /// support.
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedProtocolVersion {
        /// The major version (protocol number) reported by the device.
        major: u8,

        /// The minor version (target software) reported by the device.
        minor: u8,
    },

    /// Indicates that the device does not speak the protocol flavor the
    /// caller expected.
    #[error("expected a {expected:?} device, found {actual:?}")]
    ProtocolFlavorMismatch {
        expected: ProtocolFlavor,
        actual: ProtocolFlavor,
    },

    /// Indicates that the receiver a device is paired to was shut down.
    #[error("the receiver of the device is gone")]
    ReceiverGone,
}
