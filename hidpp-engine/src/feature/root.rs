//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{CreatableFeature, FeatureType};
use crate::{error::HidppError, nibble::U4, transport::HidppTransport};

/// Implements the `Root` / `0x0000` feature that every HID++2.0 device
/// supports by default. It always lives at feature index `0`.
#[derive(Clone)]
pub struct RootFeature {
    transport: Arc<HidppTransport>,
    device_index: u8,
}

impl CreatableFeature for RootFeature {
    const ID: u16 = 0x0000;
    const STARTING_VERSION: u8 = 0;

    fn new(transport: Arc<HidppTransport>, device_index: u8, _: u8) -> Self {
        Self {
            transport,
            device_index,
        }
    }
}

impl RootFeature {
    /// Retrieves the index, type and version of a feature ID.
    ///
    /// If the feature is not supported by the device, [`None`] is returned.
    pub async fn get_feature(
        &self,
        id: u16,
        cancel: &CancellationToken,
    ) -> Result<Option<FeatureLocation>, HidppError> {
        let [hi, lo] = id.to_be_bytes();
        let [index, typ, version] = self
            .transport
            .feature_request_with_retry::<[u8; 3], [u8; 3]>(
                self.device_index,
                0,
                U4::from_lo(0),
                &[hi, lo, 0x00],
                self.transport.config().retry_count,
                cancel,
            )
            .await?;

        if index == 0 {
            return Ok(None);
        }

        Ok(Some(FeatureLocation {
            index,
            typ: FeatureType::from(typ),
            version,
        }))
    }

    /// Pings the device with an arbitrary data byte. The device will respond
    /// with the same data if communication succeeds.
    ///
    /// The same function also reports the protocol version, which
    /// [`HidppTransport::get_protocol_version`] takes care of.
    pub async fn ping(&self, data: u8, cancel: &CancellationToken) -> Result<u8, HidppError> {
        let [_, _, echo] = self
            .transport
            .feature_request::<[u8; 3], [u8; 3]>(
                self.device_index,
                0,
                U4::from_lo(1),
                &[0x00, 0x00, data],
                cancel,
            )
            .await?;

        Ok(echo)
    }
}

/// Where a feature lives, as returned by [`RootFeature::get_feature`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureLocation {
    /// The index of the feature in the feature table.
    /// This is used for invocations of functions of that feature.
    pub index: u8,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// If the device only supports the root feature version 1, this is `0`
    /// for all features.
    pub version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TransportConfig,
        mock::{MockDevice, mouse_responder},
    };

    #[tokio::test]
    async fn feature_lookup_and_ping() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(mouse_responder);
        let transport = Arc::new(HidppTransport::new(streams, TransportConfig::default()).unwrap());
        let root = RootFeature::new(transport, 0x01, 0);
        let cancel = CancellationToken::new();

        let location = root.get_feature(0x0005, &cancel).await.unwrap().unwrap();
        assert_eq!(location.index, 0x02);
        assert_eq!(root.get_feature(0x1004, &cancel).await.unwrap(), None);
        assert_eq!(root.ping(0x42, &cancel).await.unwrap(), 0x42);

        assert_eq!(&device.written()[0][..7], &[0x10, 0x01, 0x00, 0x01, 0x00, 0x05, 0x00]);
    }
}
