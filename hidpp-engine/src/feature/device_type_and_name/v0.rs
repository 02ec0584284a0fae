//! Implements the feature starting with version 0.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio_util::sync::CancellationToken;

use crate::{
    error::HidppError,
    feature::CreatableFeature,
    nibble::U4,
    transport::HidppTransport,
};

/// Implements the `DeviceTypeAndName` / `0x0005` feature.
#[derive(Clone)]
pub struct DeviceTypeAndNameFeatureV0 {
    transport: Arc<HidppTransport>,
    device_index: u8,
    feature_index: u8,
}

impl CreatableFeature for DeviceTypeAndNameFeatureV0 {
    const ID: u16 = 0x0005;
    const STARTING_VERSION: u8 = 0;

    fn new(transport: Arc<HidppTransport>, device_index: u8, feature_index: u8) -> Self {
        Self {
            transport,
            device_index,
            feature_index,
        }
    }
}

impl DeviceTypeAndNameFeatureV0 {
    async fn call(
        &self,
        function: u8,
        params: [u8; 3],
        cancel: &CancellationToken,
    ) -> Result<[u8; 16], HidppError> {
        self.transport
            .feature_request_with_retry(
                self.device_index,
                self.feature_index,
                U4::from_lo(function),
                &params,
                self.transport.config().retry_count,
                cancel,
            )
            .await
    }

    /// Retrieves the amount of characters in the marketing name of the device.
    pub async fn get_device_name_count(&self, cancel: &CancellationToken) -> Result<u8, HidppError> {
        Ok(self.call(0, [0x00; 3], cancel).await?[0])
    }

    /// Retrieves a chunk of characters of the marketing name of the device,
    /// starting at a specific index (inclusive).
    ///
    /// Depending on the report the device answers with, at most 3 or 16
    /// characters are returned. The chunk ends at the first NUL byte.
    pub async fn get_device_name(
        &self,
        index: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HidppError> {
        let response = self.call(1, [index, 0x00, 0x00], cancel).await?;
        let len = response.iter().position(|&b| b == 0).unwrap_or(response.len());

        Ok(response[..len].to_vec())
    }

    /// Retrieves the whole marketing name of the device by first calling
    /// [`Self::get_device_name_count`] once and then repeatedly calling
    /// [`Self::get_device_name`] until all characters were received.
    pub async fn get_whole_device_name(&self, cancel: &CancellationToken) -> Result<String, HidppError> {
        let count = usize::from(self.get_device_name_count(cancel).await?);
        let mut name = Vec::with_capacity(count);

        while name.len() < count {
            let offset = u8::try_from(name.len()).map_err(|_| HidppError::UnexpectedResponse)?;
            let part = self.get_device_name(offset, cancel).await?;
            if part.is_empty() {
                return Err(HidppError::UnexpectedResponse);
            }

            let take = part.len().min(count - name.len());
            name.extend_from_slice(&part[..take]);
        }

        String::from_utf8(name).map_err(|_| HidppError::UnexpectedResponse)
    }

    /// Retrieves the marketing type of the device.
    pub async fn get_device_type(&self, cancel: &CancellationToken) -> Result<DeviceType, HidppError> {
        let response = self.call(2, [0x00; 3], cancel).await?;

        DeviceType::try_from(response[0]).map_err(|_| HidppError::UnexpectedResponse)
    }
}

/// Represents the type of a HID++2.0 device as returned by the
/// [`DeviceTypeAndNameFeatureV0`] feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum DeviceType {
    Keyboard = 0,
    RemoteControl = 1,
    Numpad = 2,
    Mouse = 3,
    Trackpad = 4,
    Trackball = 5,
    Presenter = 6,
    Receiver = 7,
    Headset = 8,
    Webcam = 9,
    SteeringWheel = 10,
    Joystick = 11,
    Gamepad = 12,
    Dock = 13,
    Speaker = 14,
    Microphone = 15,
    IlluminationLight = 16,
    ProgrammableController = 17,
    CarSimPedals = 18,
    Adapter = 19,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TransportConfig,
        frame::ReportKind,
        mock::{MockDevice, mouse_responder},
    };

    #[tokio::test]
    async fn name_and_type_are_read() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(mouse_responder);
        let transport = Arc::new(HidppTransport::new(streams, TransportConfig::default()).unwrap());
        let feature = DeviceTypeAndNameFeatureV0::new(transport, 0x01, 0x02);
        let cancel = CancellationToken::new();

        assert_eq!(feature.get_whole_device_name(&cancel).await.unwrap(), "MX Master 3");
        assert_eq!(feature.get_device_type(&cancel).await.unwrap(), DeviceType::Mouse);
    }

    #[tokio::test]
    async fn short_name_chunks_are_concatenated() {
        let (streams, device) = MockDevice::new(&[ReportKind::Short]);
        let _server = device.serve(|request| {
            let name = b"K400";
            let mut reply = request[..7].to_vec();
            match request[3] >> 4 {
                0 => reply[4] = name.len() as u8,
                _ => {
                    let offset = usize::from(request[4]);
                    let chunk = &name[offset..(offset + 3).min(name.len())];
                    reply[4..7].fill(0);
                    reply[4..4 + chunk.len()].copy_from_slice(chunk);
                },
            }
            vec![reply]
        });
        let transport = Arc::new(HidppTransport::new(streams, TransportConfig::default()).unwrap());
        let feature = DeviceTypeAndNameFeatureV0::new(transport, 0x02, 0x04);

        let name = feature
            .get_whole_device_name(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(name, "K400");
        assert_eq!(device.written().len(), 3);
    }
}
