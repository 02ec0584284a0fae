//! Implements functionality specific to HID++2.0, the feature access protocol.

use num_enum::{FromPrimitive, IntoPrimitive};
use tokio_util::sync::CancellationToken;

use crate::{
    error::HidppError,
    frame::Parameters,
    nibble::{self, U4},
    transport::{HidppTransport, with_retry},
};

/// The feature index HID++2.0 devices report errors with.
pub const ERROR_FEATURE_INDEX: u8 = 0xff;

/// Represents the type of an error a HID++2.0 device returns as part of a
/// message with the feature index [`ERROR_FEATURE_INDEX`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ErrorCode {
    /// No error.
    NoError = 0x00,

    /// The device could not categorize the error.
    Unknown = 0x01,

    /// A passed argument was invalid.
    InvalidArgument = 0x02,

    /// A passed argument was outside of the accepted range.
    OutOfRange = 0x03,

    /// The device reported a hardware failure.
    HardwareError = 0x04,

    /// Internal error of the device firmware.
    LogitechInternal = 0x05,

    /// The feature index of the request does not exist.
    InvalidFeatureIndex = 0x06,

    /// The function ID of the request is not defined by the feature.
    InvalidFunctionId = 0x07,

    /// The device is busy and cannot handle the request right now.
    Busy = 0x08,

    /// The request is not supported by the device.
    Unsupported = 0x09,

    /// Any code not defined above.
    #[num_enum(catch_all)]
    Other(u8),
}

impl HidppTransport {
    /// Calls a function of a HID++2.0 feature.
    ///
    /// The function ID and the transport's software ID are combined into the
    /// fourth header byte.
    pub async fn feature_request<Req: Parameters, Resp: Parameters>(
        &self,
        device_index: u8,
        feature_index: u8,
        function_id: U4,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, HidppError> {
        self.send(
            device_index,
            feature_index,
            nibble::combine(function_id, self.software_id()),
            request,
            cancel,
        )
        .await
    }

    /// [`Self::feature_request`], retried on timeouts and busy errors.
    pub async fn feature_request_with_retry<Req: Parameters, Resp: Parameters>(
        &self,
        device_index: u8,
        feature_index: u8,
        function_id: U4,
        request: &Req,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Resp, HidppError> {
        with_retry(retry_count, cancel, || {
            self.feature_request(device_index, feature_index, function_id, request, cancel)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TransportConfig, mock::MockDevice};

    #[test]
    fn error_codes_cover_every_byte() {
        assert_eq!(ErrorCode::from(0x08), ErrorCode::Busy);
        assert_eq!(ErrorCode::from(0x01), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from(0xee), ErrorCode::Other(0xee));
    }

    #[tokio::test]
    async fn function_byte_carries_the_software_id() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            let mut reply = request.to_vec();
            reply[4] = 0x07;
            vec![reply]
        });

        let config = TransportConfig::default().with_software_id(0x0a);
        let transport = HidppTransport::new(streams, config).unwrap();

        let response: [u8; 3] = transport
            .feature_request(0x02, 0x05, U4::from_lo(0x3), &[0x01, 0x02, 0x03], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, [0x07, 0x02, 0x03]);
        assert_eq!(&device.written()[0][..4], &[0x10, 0x02, 0x05, 0x3a]);
    }

    #[tokio::test]
    async fn feature_errors_are_typed() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            let mut reply = vec![0u8; 20];
            reply[..6].copy_from_slice(&[0x11, request[1], 0xff, request[2], request[3], 0x07]);
            vec![reply]
        });

        let transport = HidppTransport::new(streams, TransportConfig::default()).unwrap();
        let result: Result<[u8; 16], _> = transport
            .feature_request(0x01, 0x04, U4::from_lo(0x9), &[0u8; 16], &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(HidppError::FeatureAccess(ErrorCode::InvalidFunctionId))
        ));
    }
}
