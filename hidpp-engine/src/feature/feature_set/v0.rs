//! Implements the feature starting with version 0.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    error::HidppError,
    feature::{CreatableFeature, FeatureInformation, FeatureType},
    nibble::U4,
    transport::HidppTransport,
};

/// Implements the `FeatureSet` / `0x0001` feature.
///
/// This feature is primarily used to collect all features supported by the
/// device. To achieve this, call [`Self::count`] to retrieve the amount of
/// supported features (excluding the root feature). Then call
/// [`Self::get_feature`] for every `i in 1..=count`.
#[derive(Clone)]
pub struct FeatureSetFeatureV0 {
    transport: Arc<HidppTransport>,
    device_index: u8,
    feature_index: u8,
}

impl CreatableFeature for FeatureSetFeatureV0 {
    const ID: u16 = 0x0001;
    const STARTING_VERSION: u8 = 0;

    fn new(transport: Arc<HidppTransport>, device_index: u8, feature_index: u8) -> Self {
        Self {
            transport,
            device_index,
            feature_index,
        }
    }
}

impl FeatureSetFeatureV0 {
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

    /// Retrieves the amount of features supported by the device, not including
    /// the root feature.
    pub async fn count(&self, cancel: &CancellationToken) -> Result<u8, HidppError> {
        let response = self.call(0, [0x00; 3], cancel).await?;
        Ok(response[0])
    }

    /// Retrieves the information about a specific feature based on its index in
    /// the feature table.
    ///
    /// Feature index `0` for the root feature is not allowed.
    pub async fn get_feature(
        &self,
        index: u8,
        cancel: &CancellationToken,
    ) -> Result<FeatureInformation, HidppError> {
        let response = self.call(1, [index, 0x00, 0x00], cancel).await?;

        Ok(FeatureInformation {
            id: u16::from_be_bytes([response[0], response[1]]),
            typ: FeatureType::from(response[2]),
            version: response[3],
        })
    }
}
