//! Implements functionality specific to HID++1.0, the register access
//! protocol.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use tokio_util::sync::CancellationToken;

use crate::{
    error::HidppError,
    frame::{ParameterLength, Parameters},
    transport::{HidppTransport, with_retry},
};

/// Represents a globally defined sub ID of a HID++1.0 message.
///
/// This enum only includes sub IDs that are defined globally across all
/// devices. Most devices (e.g. the Unifying Receiver) define additional sub IDs
/// specific to their functionality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum SubId {
    /// Sent by a receiver when a paired device lost its link.
    DeviceDisconnect = 0x40,

    /// Sent by a receiver when a paired device (re)connected, or in response
    /// to a fake device arrival request.
    DeviceConnect = 0x41,

    /// Used to set a 3-byte register value.
    SetShortRegister = 0x80,

    /// Used to retrieve a 3-byte register value.
    GetShortRegister = 0x81,

    /// Used to set a 16-byte register value.
    SetLongRegister = 0x82,

    /// Used to retrieve a 16-byte register value.
    GetLongRegister = 0x83,

    /// Used to set a 60-byte register value.
    SetVeryLongRegister = 0x84,

    /// Used to retrieve a 60-byte register value.
    GetVeryLongRegister = 0x85,

    /// Used to indicate an error response. The error code included in the
    /// message can be mapped using [`ErrorCode::from`].
    Error = 0x8f,
}

impl SubId {
    /// The sub ID retrieving a register of the given size.
    pub const fn get_register(length: ParameterLength) -> Self {
        match length {
            ParameterLength::Short => SubId::GetShortRegister,
            ParameterLength::Long => SubId::GetLongRegister,
            ParameterLength::VeryLong => SubId::GetVeryLongRegister,
        }
    }

    /// The sub ID writing a register of the given size.
    pub const fn set_register(length: ParameterLength) -> Self {
        match length {
            ParameterLength::Short => SubId::SetShortRegister,
            ParameterLength::Long => SubId::SetLongRegister,
            ParameterLength::VeryLong => SubId::SetVeryLongRegister,
        }
    }
}

/// Registers shared by HID++1.0 receivers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum Register {
    /// Enables the HID++ notification classes given as a 3-byte bitfield.
    EnableHidPlusPlusNotifications = 0x00,

    /// Reports the number of connected devices and accepts connection
    /// actions.
    ConnectionState = 0x02,

    /// Pairing information of the paired devices, addressed by an additional
    /// parameter byte.
    NonVolatileAndPairingInformation = 0xb5,
}

/// Notification classes of [`Register::EnableHidPlusPlusNotifications`].
pub mod notification_flags {
    /// Connection and disconnection of wireless devices.
    pub const WIRELESS_NOTIFICATIONS: u32 = 0x00_01_00;

    /// Signals that host software is present.
    pub const SOFTWARE_PRESENT: u32 = 0x00_08_00;
}

/// Actions accepted by [`Register::ConnectionState`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum ConnectionAction {
    /// Makes the receiver emit a connect notification for every paired
    /// device.
    FakeDeviceArrival = 0x02,
}

/// Represents the type of an error a HID++1.0 device returns as part of a
/// message with the [`SubId::Error`] sub ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ErrorCode {
    /// No error.
    Success = 0x00,

    /// The sub ID of a sent message is invalid.
    InvalidSubId = 0x01,

    /// The address included in a sent message is invalid.
    InvalidAddress = 0x02,

    /// The value included in a sent message is invalid.
    InvalidValue = 0x03,

    /// A connection request failed on the receiver's side.
    ConnectFail = 0x04,

    /// The receiver indicates that too many devices are connected to it.
    TooManyDevices = 0x05,

    /// The receiver indicates that something already exists.
    AlreadyExists = 0x06,

    /// The receiver is currently handling a downstream (to device) message and
    /// cannot process a second one.
    Busy = 0x07,

    /// Trying to send a message to a device (device index) where there is no
    /// device paired.
    UnknownDevice = 0x08,

    /// A HID++ command has been sent to a device that is in disconnected mode.
    /// A device reconnects when the user interacts with it.
    ResourceError = 0x09,

    /// A sent request is not available in the current context.
    RequestUnavailable = 0x0a,

    /// A request parameter has an unsupported value.
    InvalidParamValue = 0x0b,

    /// The PIN code a device was wrong.
    WrongPinCode = 0x0c,

    /// Any code not defined above.
    #[num_enum(catch_all)]
    Other(u8),
}

impl HidppTransport {
    /// Reads a register, choosing the sub ID from the size of `R`.
    pub async fn get_register<R: Parameters>(
        &self,
        device_index: u8,
        address: u8,
        cancel: &CancellationToken,
    ) -> Result<R, HidppError> {
        self.get_register_with_parameter(device_index, address, 0x00, cancel)
            .await
    }

    /// Reads a register that takes one additional parameter byte selecting
    /// the value to return.
    pub async fn get_register_with_parameter<R: Parameters>(
        &self,
        device_index: u8,
        address: u8,
        parameter: u8,
        cancel: &CancellationToken,
    ) -> Result<R, HidppError> {
        self.send::<[u8; 3], R>(
            device_index,
            SubId::get_register(R::LENGTH).into(),
            address,
            &[parameter, 0x00, 0x00],
            cancel,
        )
        .await
    }

    /// Writes a register, choosing the sub ID from the size of `value`.
    ///
    /// The device acknowledges the write with an empty response.
    pub async fn set_register<V: Parameters>(
        &self,
        device_index: u8,
        address: u8,
        value: &V,
        cancel: &CancellationToken,
    ) -> Result<(), HidppError> {
        self.send_ack(
            device_index,
            SubId::set_register(V::LENGTH).into(),
            address,
            value,
            cancel,
        )
        .await
    }

    /// [`Self::get_register_with_parameter`], retried on timeouts and busy
    /// errors.
    pub async fn get_register_with_parameter_with_retry<R: Parameters>(
        &self,
        device_index: u8,
        address: u8,
        parameter: u8,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Result<R, HidppError> {
        with_retry(retry_count, cancel, || {
            self.get_register_with_parameter(device_index, address, parameter, cancel)
        })
        .await
    }

    /// [`Self::set_register`], retried on timeouts and busy errors.
    pub async fn set_register_with_retry<V: Parameters>(
        &self,
        device_index: u8,
        address: u8,
        value: &V,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Result<(), HidppError> {
        with_retry(retry_count, cancel, || {
            self.set_register(device_index, address, value, cancel)
        })
        .await
    }
}

/// Encodes a 24-bit register value as the big-endian parameter block HID++1.0
/// uses for short registers.
pub fn encode_u24(value: u32) -> [u8; 3] {
    let [_, hi, mid, lo] = value.to_be_bytes();
    [hi, mid, lo]
}
