//! Implements devices reachable over a [`HidppTransport`].
//!
//! A device either sits directly on the transport at device index `0xFF`
//! (corded and Bluetooth devices, receivers) or is paired to a receiver and
//! addressed by its pairing slot. [`open`] probes the former, a [`Receiver`]
//! tracks the latter.

use std::sync::Arc;

use num_enum::{FromPrimitive, IntoPrimitive};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DeviceError, HidppError},
    event::EventEmitter,
    feature::{
        CreatableFeature,
        FeatureTable,
        device_type_and_name::v0::{DeviceType, DeviceTypeAndNameFeatureV0},
    },
    frame::Notification,
    protocol::{ProtocolFlavor, ProtocolVersion, rap::SubId},
    transport::{HidppTransport, ListenerHandle},
};

pub mod category;
mod direct;
mod factory;
mod paired;
mod receiver;

pub use direct::{FeatureAccessDevice, RegisterAccessDevice};
pub use factory::open;
pub use paired::{ConnectionEvent, PairedDevice};
pub use receiver::{PairingInformation, Receiver, ReceiverEvent};

/// The device index of a device directly attached to the transport, which
/// includes receivers themselves.
pub const DIRECT_DEVICE_INDEX: u8 = 0xff;

/// How a device is connected to the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceSource {
    #[default]
    Unknown,
    Usb,
    Bluetooth,
    BluetoothLowEnergy,

    /// Paired to an eQuad (Unifying, Lightspeed, Bolt, ...) receiver.
    EQuad,
}

/// Identifies the kind of hardware a device is.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId {
    pub source: DeviceSource,

    /// The USB or Bluetooth product ID, or the wireless product ID for paired
    /// devices.
    pub product_id: u16,
}

impl DeviceId {
    pub fn new(source: DeviceSource, product_id: u16) -> Self {
        Self { source, product_id }
    }
}

/// The kind of device as reported in connection notifications.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum DeviceKind {
    Unknown = 0x00,
    Keyboard = 0x01,
    Mouse = 0x02,
    Numpad = 0x03,
    Presenter = 0x04,
    Remote = 0x07,
    Trackball = 0x08,
    Touchpad = 0x09,
    Tablet = 0x0a,
    Gamepad = 0x0b,
    Joystick = 0x0c,
    Headset = 0x0d,

    #[num_enum(catch_all)]
    Other(u8),
}

/// The link information byte of a connection notification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceConnectionInfo {
    pub kind: DeviceKind,
    pub encrypted: bool,

    /// Whether the device can currently be talked to.
    pub link_established: bool,
}

impl From<u8> for DeviceConnectionInfo {
    fn from(value: u8) -> Self {
        Self {
            kind: DeviceKind::from(value & 0x0f),
            encrypted: value & (1 << 5) != 0,
            link_established: value & (1 << 6) == 0,
        }
    }
}

/// The parameters of a device connection notification (sub ID `0x41`) sent by
/// a receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionParameters {
    pub device_index: u8,

    /// The wireless protocol the device is connected with.
    pub protocol_type: u8,

    pub info: DeviceConnectionInfo,
    pub wireless_product_id: u16,
}

impl ConnectionParameters {
    /// Parses a raw connection notification.
    ///
    /// Returns [`None`] if the frame is no connection notification.
    pub fn read(frame: &[u8]) -> Option<Self> {
        if frame.len() < 7 || frame[2] != u8::from(SubId::DeviceConnect) {
            return None;
        }

        Some(Self {
            device_index: frame[1],
            protocol_type: frame[3],
            info: DeviceConnectionInfo::from(frame[4]),
            wireless_product_id: u16::from_le_bytes([frame[5], frame[6]]),
        })
    }
}

/// Any device the engine can create.
#[derive(Clone, Debug)]
pub enum Device {
    RegisterAccess(Arc<RegisterAccessDevice>),
    FeatureAccess(Arc<FeatureAccessDevice>),
    Receiver(Arc<Receiver>),
    Paired(Arc<PairedDevice>),
}

impl Device {
    pub fn id(&self) -> DeviceId {
        match self {
            Device::RegisterAccess(device) => device.id(),
            Device::FeatureAccess(device) => device.id(),
            Device::Receiver(receiver) => receiver.id(),
            Device::Paired(device) => device.id(),
        }
    }

    pub fn device_index(&self) -> u8 {
        match self {
            Device::Paired(device) => device.device_index(),
            _ => DIRECT_DEVICE_INDEX,
        }
    }

    /// The protocol flavor requests to the device use.
    pub fn protocol_flavor(&self) -> ProtocolFlavor {
        match self {
            Device::RegisterAccess(_) | Device::Receiver(_) => ProtocolFlavor::RegisterAccess,
            Device::FeatureAccess(_) => ProtocolFlavor::FeatureAccess,
            Device::Paired(device) => device.protocol_flavor(),
        }
    }

    /// The name of the device, if it is known (yet).
    pub fn name(&self) -> Option<String> {
        match self {
            Device::RegisterAccess(_) | Device::Receiver(_) => None,
            Device::FeatureAccess(device) => device.name().map(str::to_string),
            Device::Paired(device) => device.name(),
        }
    }

    /// Creates a receiver for every notification addressed to the device.
    pub fn listen_notifications(&self) -> flume::Receiver<Notification> {
        match self {
            Device::RegisterAccess(device) => device.listen_notifications(),
            Device::FeatureAccess(device) => device.listen_notifications(),
            Device::Receiver(receiver) => receiver.listen_notifications(),
            Device::Paired(device) => device.listen_notifications(),
        }
    }
}

/// Forwards the notifications of a device index to an emitter.
///
/// The listener lives until the returned handle is removed from the
/// transport.
pub(crate) fn forward_notifications(
    transport: &HidppTransport,
    device_index: u8,
) -> (Arc<EventEmitter<Notification>>, ListenerHandle) {
    let emitter = Arc::new(EventEmitter::new());

    let handle = transport.add_notification_listener(device_index, {
        let emitter = Arc::clone(&emitter);

        move |frame| {
            if let Some(notification) = Notification::read(frame) {
                emitter.emit(notification);
            }
        }
    });

    (emitter, handle)
}

/// Accepts the protocol versions feature access devices are supported with.
pub(crate) fn check_feature_access_version(
    version: ProtocolVersion,
) -> Result<ProtocolVersion, DeviceError> {
    match version {
        ProtocolVersion::V20 {
            protocol_num: 2..=4,
            ..
        } => Ok(version),
        ProtocolVersion::V20 {
            protocol_num,
            target_sw,
        } => Err(DeviceError::UnsupportedProtocolVersion {
            major: protocol_num,
            minor: target_sw,
        }),
        ProtocolVersion::V10 => Err(DeviceError::ProtocolFlavorMismatch {
            expected: ProtocolFlavor::FeatureAccess,
            actual: ProtocolFlavor::RegisterAccess,
        }),
    }
}

/// Reads the marketing name and type of a feature access device, if it
/// supports the DeviceTypeAndName feature.
pub(crate) async fn read_name_and_type(
    transport: &Arc<HidppTransport>,
    device_index: u8,
    features: &FeatureTable,
    cancel: &CancellationToken,
) -> Result<(Option<String>, Option<DeviceType>), HidppError> {
    let Some(feature_index) = features.find(DeviceTypeAndNameFeatureV0::ID) else {
        return Ok((None, None));
    };

    let feature = DeviceTypeAndNameFeatureV0::new(Arc::clone(transport), device_index, feature_index);
    let name = feature.get_whole_device_name(cancel).await?;
    let typ = feature.get_device_type(cancel).await?;

    Ok((Some(name), Some(typ)))
}

/// Binds a feature implementation if the feature table lists a version the
/// implementation supports.
pub(crate) fn bind_feature<F: CreatableFeature>(
    transport: &Arc<HidppTransport>,
    device_index: u8,
    features: &FeatureTable,
) -> Option<F> {
    let feature_index = features.find(F::ID)?;
    let info = features.get(feature_index)?;

    (info.version >= F::STARTING_VERSION)
        .then(|| F::new(Arc::clone(transport), device_index, feature_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_info_bits() {
        let info = DeviceConnectionInfo::from(0x62);
        assert_eq!(info.kind, DeviceKind::Mouse);
        assert!(info.encrypted);
        assert!(!info.link_established);

        let info = DeviceConnectionInfo::from(0x0e);
        assert_eq!(info.kind, DeviceKind::Other(0x0e));
        assert!(!info.encrypted);
        assert!(info.link_established);
    }

    #[test]
    fn connection_parameters_parse() {
        let parameters = ConnectionParameters::read(&[0x10, 0x03, 0x41, 0x04, 0x22, 0x34, 0x12]).unwrap();

        assert_eq!(parameters.device_index, 0x03);
        assert_eq!(parameters.protocol_type, 0x04);
        assert_eq!(parameters.info.kind, DeviceKind::Mouse);
        assert_eq!(parameters.wireless_product_id, 0x1234);

        assert_eq!(ConnectionParameters::read(&[0x10, 0x03, 0x40, 0x04, 0x22, 0x34, 0x12]), None);
        assert_eq!(ConnectionParameters::read(&[0x10, 0x03, 0x41]), None);
    }

    #[test]
    fn feature_access_versions() {
        assert!(
            check_feature_access_version(ProtocolVersion::V20 {
                protocol_num: 4,
                target_sw: 5
            })
            .is_ok()
        );
        assert!(matches!(
            check_feature_access_version(ProtocolVersion::V20 {
                protocol_num: 5,
                target_sw: 1
            }),
            Err(DeviceError::UnsupportedProtocolVersion { major: 5, minor: 1 })
        ));
        assert!(matches!(
            check_feature_access_version(ProtocolVersion::V10),
            Err(DeviceError::ProtocolFlavorMismatch { .. })
        ));
    }
}
