//! Implements the protocol-specific parts of HID++.

use num_enum::{FromPrimitive, IntoPrimitive};
use tokio_util::sync::CancellationToken;

use crate::{error::HidppError, nibble::U4, transport::HidppTransport};

pub mod fap;
pub mod rap;

/// The ping value echoed back by HID++2.0 devices during protocol probing.
const PROBE_PING: u8 = 0x5a;

/// The protocol generation a device index is known to speak.
///
/// The flavor decides how the ambiguous `0x8F`/`0xFF` control bytes and
/// notifications of a device index are interpreted by the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProtocolFlavor {
    /// Nothing is known (yet). Heuristics are used.
    #[default]
    Unknown = 0,

    /// HID++1.0, addressing registers.
    RegisterAccess = 1,

    /// HID++2.0, addressing features.
    FeatureAccess = 2,

    /// HID++2.0 spoken by a device behind a HID++1.0 receiver, which still
    /// emits HID++1.0 connection notifications on the device's behalf.
    FeatureAccessOverRegisterAccess = 3,
}

impl ProtocolFlavor {
    /// Checks whether requests to the device use features.
    pub fn is_feature_access(self) -> bool {
        matches!(
            self,
            ProtocolFlavor::FeatureAccess | ProtocolFlavor::FeatureAccessOverRegisterAccess
        )
    }
}

/// Represents the protocol version a device supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolVersion {
    /// The older HID++1.0 protocol. Mostly used for receivers.
    V10,

    /// All newer protocols starting from HID+2.0.
    ///
    /// Traditionally, the version was split into a major and a minor version,
    /// defining the concrete protocol version. These two values were later
    /// redefined to serve the purpose of indicating which host software to
    /// target.
    V20 {
        /// The protocol number is a field that hints the host software if it
        /// should support the device.
        ///
        /// `protocol_num = 2` : Intended target SW is Logitech SetPoint\
        /// `protocol_num = 3` : Intended OEM SW described in `target_sw` field\
        /// `protocol_num = 4` : Intended target SW described in `target_sw`
        /// field
        protocol_num: u8,

        /// When `protocol_num >= 3` this field further hints at which software
        /// should support the device. Otherwise the value is zero.
        target_sw: u8,
    },
}

impl HidppTransport {
    /// Tries to determine the protocol version of a specific device.
    ///
    /// To determine the protocol version, a HID++2.0 ping (feature index
    /// `0x00`, function `0x1`) is sent. Devices supporting protocol >=2.0
    /// respond with their protocol version. Devices only supporting protocol
    /// 1.0 respond with an error indicating that `0x00` is no valid sub ID,
    /// which pins them to version 1.0.
    pub async fn get_protocol_version(
        &self,
        device_index: u8,
        cancel: &CancellationToken,
    ) -> Result<ProtocolVersion, HidppError> {
        let response = self
            .feature_request::<[u8; 3], [u8; 3]>(
                device_index,
                0x00,
                U4::from_lo(0x1),
                &[0x00, 0x00, PROBE_PING],
                cancel,
            )
            .await;

        match response {
            Ok([protocol_num, target_sw, _]) => Ok(ProtocolVersion::V20 {
                protocol_num,
                target_sw,
            }),
            Err(HidppError::RegisterAccess(rap::ErrorCode::InvalidSubId)) => Ok(ProtocolVersion::V10),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TransportConfig, frame::ReportKind, mock::MockDevice};

    #[test]
    fn unknown_raw_flavors_fall_back_to_unknown() {
        assert_eq!(ProtocolFlavor::from(2), ProtocolFlavor::FeatureAccess);
        assert_eq!(ProtocolFlavor::from(0x42), ProtocolFlavor::Unknown);
        assert_eq!(u8::from(ProtocolFlavor::FeatureAccessOverRegisterAccess), 3);
        assert!(ProtocolFlavor::FeatureAccessOverRegisterAccess.is_feature_access());
        assert!(!ProtocolFlavor::RegisterAccess.is_feature_access());
    }

    #[tokio::test]
    async fn probe_recognizes_feature_access_devices() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            let mut reply = request[..7].to_vec();
            reply[4] = 0x04;
            reply[5] = 0x02;
            vec![reply]
        });

        let transport = HidppTransport::new(streams, TransportConfig::default()).unwrap();
        let version = transport
            .get_protocol_version(0xff, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(version, ProtocolVersion::V20 {
            protocol_num: 4,
            target_sw: 2
        });
    }

    #[tokio::test]
    async fn probe_maps_invalid_sub_id_to_register_access() {
        let (streams, device) = MockDevice::new(&[ReportKind::Short]);
        let _server = device.serve(|request| {
            vec![vec![
                0x10,
                request[1],
                0x8f,
                request[2],
                request[3],
                u8::from(rap::ErrorCode::InvalidSubId),
                0x00,
            ]]
        });

        let transport = HidppTransport::new(streams, TransportConfig::default()).unwrap();
        let version = transport
            .get_protocol_version(0xff, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(version, ProtocolVersion::V10);
    }
}
