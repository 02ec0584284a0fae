//! Probes the device behind a freshly opened set of HID streams.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    DIRECT_DEVICE_INDEX,
    Device,
    DeviceId,
    FeatureAccessDevice,
    Receiver,
    RegisterAccessDevice,
    category::{ProductCategory, infer_product_category},
    check_feature_access_version,
};
use crate::{
    config::TransportConfig,
    error::{DeviceError, HidppError},
    protocol::{ProtocolFlavor, ProtocolVersion, rap},
    stream::HidStreams,
    transport::{HidppTransport, with_retry},
};

/// Opens a transport on `streams` and creates the device it leads to.
///
/// The protocol version of device index `0xFF` decides what is created.
/// HID++1.0 receivers (by product category) become a [`Receiver`], other
/// HID++1.0 devices a [`RegisterAccessDevice`], and HID++2.0 devices a
/// [`FeatureAccessDevice`] with discovered features.
///
/// Pass [`ProtocolFlavor::Unknown`] as `expected` to accept either
/// generation. On any error, the transport is shut down again.
pub async fn open(
    streams: HidStreams,
    config: TransportConfig,
    expected: ProtocolFlavor,
    id: DeviceId,
    cancel: &CancellationToken,
) -> Result<Device, DeviceError> {
    let transport = Arc::new(HidppTransport::new(streams, config)?);

    match probe(&transport, expected, id, cancel).await {
        Ok(device) => Ok(device),
        Err(err) => {
            transport.shutdown().await;
            Err(err)
        },
    }
}

async fn probe(
    transport: &Arc<HidppTransport>,
    expected: ProtocolFlavor,
    id: DeviceId,
    cancel: &CancellationToken,
) -> Result<Device, DeviceError> {
    let version = with_retry(transport.config().retry_count, cancel, || {
        transport.get_protocol_version(DIRECT_DEVICE_INDEX, cancel)
    })
    .await
    .map_err(|err| match err {
        HidppError::RegisterAccess(rap::ErrorCode::UnknownDevice) => DeviceError::DeviceNotFound,
        err => err.into(),
    })?;

    let actual = match version {
        ProtocolVersion::V10 => ProtocolFlavor::RegisterAccess,
        ProtocolVersion::V20 { .. } => ProtocolFlavor::FeatureAccess,
    };
    if expected != ProtocolFlavor::Unknown && expected != actual {
        return Err(DeviceError::ProtocolFlavorMismatch { expected, actual });
    }

    debug!(
        product_id = format_args!("0x{:04X}", id.product_id),
        ?version,
        "probed device"
    );

    match version {
        ProtocolVersion::V10 => {
            transport.set_protocol_flavor(DIRECT_DEVICE_INDEX, ProtocolFlavor::RegisterAccess);

            if infer_product_category(id.product_id) == Some(ProductCategory::UsbReceiver) {
                Ok(Device::Receiver(Arc::new(Receiver::new(Arc::clone(transport), id))))
            } else {
                Ok(Device::RegisterAccess(Arc::new(RegisterAccessDevice::new(
                    Arc::clone(transport),
                    id,
                ))))
            }
        },
        ProtocolVersion::V20 { .. } => {
            let version = check_feature_access_version(version)?;
            transport.set_protocol_flavor(DIRECT_DEVICE_INDEX, ProtocolFlavor::FeatureAccess);

            let device = FeatureAccessDevice::initialize(Arc::clone(transport), id, version, cancel).await?;
            Ok(Device::FeatureAccess(Arc::new(device)))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::DeviceSource,
        mock::{MockDevice, mouse_responder},
    };

    fn register_access_responder(request: &[u8]) -> Vec<Vec<u8>> {
        vec![vec![
            0x10,
            request[1],
            0x8f,
            request[2],
            request[3],
            u8::from(rap::ErrorCode::InvalidSubId),
            0x00,
        ]]
    }

    #[tokio::test]
    async fn register_access_receivers_become_receivers() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(register_access_responder);

        let opened = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::Unknown,
            DeviceId::new(DeviceSource::Usb, 0xc52b),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(opened, Device::Receiver(_)));
        assert_eq!(opened.protocol_flavor(), ProtocolFlavor::RegisterAccess);
    }

    #[tokio::test]
    async fn other_register_access_devices_stay_generic() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(register_access_responder);

        let opened = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::RegisterAccess,
            DeviceId::new(DeviceSource::Usb, 0xc077),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(opened, Device::RegisterAccess(_)));
    }

    #[tokio::test]
    async fn feature_access_devices_are_identified() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(mouse_responder);

        let opened = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::Unknown,
            DeviceId::new(DeviceSource::Bluetooth, 0xb023),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let Device::FeatureAccess(mouse) = &opened else {
            panic!("expected a feature access device");
        };
        assert_eq!(mouse.features().len(), 4);
        assert_eq!(opened.name().as_deref(), Some("MX Master 3"));
        assert_eq!(opened.device_index(), DIRECT_DEVICE_INDEX);
    }

    #[tokio::test]
    async fn unexpected_flavor_is_rejected() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(register_access_responder);

        let err = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::FeatureAccess,
            DeviceId::new(DeviceSource::Usb, 0xc077),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeviceError::ProtocolFlavorMismatch {
            expected: ProtocolFlavor::FeatureAccess,
            actual: ProtocolFlavor::RegisterAccess,
        }));
    }

    #[tokio::test]
    async fn unsupported_versions_are_rejected() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            let mut reply = request[..7].to_vec();
            reply[4] = 0x01;
            reply[5] = 0x00;
            vec![reply]
        });

        let err = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::Unknown,
            DeviceId::new(DeviceSource::Usb, 0xc08b),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeviceError::UnsupportedProtocolVersion { major: 1, minor: 0 }));
    }

    #[tokio::test]
    async fn unknown_device_index_is_not_found() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            vec![vec![
                0x10,
                request[1],
                0x8f,
                request[2],
                request[3],
                u8::from(rap::ErrorCode::UnknownDevice),
                0x00,
            ]]
        });

        let err = open(
            streams,
            TransportConfig::default(),
            ProtocolFlavor::Unknown,
            DeviceId::new(DeviceSource::Usb, 0xc52b),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeviceError::DeviceNotFound));
    }
}
