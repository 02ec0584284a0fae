//! HID++2.0 features needed to discover and identify devices.
//!
//! Everything beyond discovery (battery, DPI, lighting, ...) is left to
//! feature handlers built on top of [`HidppTransport::feature_request`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{error::HidppError, transport::HidppTransport};

pub mod device_type_and_name;
pub mod feature_set;
pub mod registry;
pub mod root;

use feature_set::v0::FeatureSetFeatureV0;
use root::RootFeature;

/// Represents a feature implementation that can be bound to a feature index.
pub trait CreatableFeature: Sized {
    /// The protocol ID of the implemented feature.
    const ID: u16;

    /// The version of the feature the implementation starts to support.
    const STARTING_VERSION: u8;

    /// Binds the implementation to a feature index of a device.
    fn new(transport: Arc<HidppTransport>, device_index: u8, feature_index: u8) -> Self;
}

/// A bitfield describing some properties of a feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureType {
    /// An obsolete feature is a feature that has been replaced by a newer one,
    /// but is advertised in order for older SWs to still be able to support the
    /// feature.
    pub obsolete: bool,

    /// A SW hidden feature is a feature that should not be known/managed/used
    /// by end user configuration SW.
    pub hidden: bool,

    /// A hidden feature that has been disabled for user software. Used for
    /// internal testing and manufacturing.
    pub engineering: bool,

    /// A manufacturing feature that can be permanently deactivated.
    pub manufacturing_deactivatable: bool,

    /// A compliance feature that can be permanently deactivated.
    pub compliance_deactivatable: bool,
}

impl From<u8> for FeatureType {
    fn from(value: u8) -> Self {
        Self {
            obsolete: value & (1 << 7) != 0,
            hidden: value & (1 << 6) != 0,
            engineering: value & (1 << 5) != 0,
            manufacturing_deactivatable: value & (1 << 4) != 0,
            compliance_deactivatable: value & (1 << 3) != 0,
        }
    }
}

impl From<FeatureType> for u8 {
    fn from(value: FeatureType) -> Self {
        [
            (value.obsolete, 7),
            (value.hidden, 6),
            (value.engineering, 5),
            (value.manufacturing_deactivatable, 4),
            (value.compliance_deactivatable, 3),
        ]
        .into_iter()
        .filter(|&(set, _)| set)
        .fold(0, |raw, (_, bit)| raw | 1 << bit)
    }
}

/// An entry of a device's feature table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureInformation {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// This field was added in version 1 of the FeatureSet feature and is `0`
    /// for devices with an older one.
    pub version: u8,
}

/// The features of a device, indexed by feature index.
///
/// Index `0` always holds the root feature.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureTable {
    features: Vec<FeatureInformation>,
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self {
            features: vec![FeatureInformation {
                id: RootFeature::ID,
                typ: FeatureType::default(),
                version: 0,
            }],
        }
    }
}

impl FeatureTable {
    /// The amount of features, including the root feature.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The feature at a feature index.
    pub fn get(&self, feature_index: u8) -> Option<&FeatureInformation> {
        self.features.get(usize::from(feature_index))
    }

    /// Looks up the feature index of a feature ID.
    pub fn find(&self, id: u16) -> Option<u8> {
        self.features
            .iter()
            .position(|feature| feature.id == id)
            .and_then(|index| u8::try_from(index).ok())
    }

    pub fn contains(&self, id: u16) -> bool {
        self.find(id).is_some()
    }

    /// Iterates over all features with their feature index.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &FeatureInformation)> {
        (0..=u8::MAX).zip(self.features.iter())
    }

    fn push(&mut self, feature: FeatureInformation) {
        self.features.push(feature);
    }
}

/// Collects the feature table of a device.
///
/// A device without the FeatureSet feature gets a table with only the root
/// feature.
pub async fn discover(
    transport: &Arc<HidppTransport>,
    device_index: u8,
    cancel: &CancellationToken,
) -> Result<FeatureTable, HidppError> {
    let mut table = FeatureTable::default();

    let root = RootFeature::new(Arc::clone(transport), device_index, 0);
    let Some(location) = root.get_feature(FeatureSetFeatureV0::ID, cancel).await? else {
        debug!(device_index, "device does not support feature enumeration");
        return Ok(table);
    };

    let feature_set = FeatureSetFeatureV0::new(Arc::clone(transport), device_index, location.index);
    let count = feature_set.count(cancel).await?;

    for feature_index in 1..=count {
        let feature = feature_set.get_feature(feature_index, cancel).await?;

        match registry::lookup(feature.id) {
            Some(known) => debug!(
                device_index,
                feature_index,
                version = feature.version,
                "known feature {}",
                known.name
            ),
            None => debug!(
                device_index,
                feature_index,
                version = feature.version,
                "unknown feature 0x{:04x}",
                feature.id
            ),
        }

        table.push(feature);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TransportConfig,
        mock::{MockDevice, mouse_responder},
    };

    #[test]
    fn feature_type_bits_survive_conversion() {
        let typ = FeatureType::from(0b1010_1000);

        assert!(typ.obsolete);
        assert!(!typ.hidden);
        assert!(typ.engineering);
        assert!(!typ.manufacturing_deactivatable);
        assert!(typ.compliance_deactivatable);
        assert_eq!(u8::from(typ), 0b1010_1000);
    }

    #[tokio::test]
    async fn discovery_builds_the_feature_table() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(mouse_responder);
        let transport = Arc::new(HidppTransport::new(streams, TransportConfig::default()).unwrap());

        let table = discover(&transport, 0x01, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.find(0x0000), Some(0));
        assert_eq!(table.find(0x0001), Some(1));
        assert_eq!(table.find(0x0005), Some(2));
        assert_eq!(table.find(0x2110), Some(3));
        assert!(table.get(3).unwrap().typ.hidden);
        assert!(!table.contains(0x1004));
    }

    #[tokio::test]
    async fn devices_without_feature_set_only_know_root() {
        let (streams, device) = MockDevice::short_and_long();
        let _server = device.serve(|request| {
            let mut reply = request[..7].to_vec();
            reply[4..7].fill(0);
            vec![reply]
        });
        let transport = Arc::new(HidppTransport::new(streams, TransportConfig::default()).unwrap());

        let table = discover(&transport, 0x02, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(table, FeatureTable::default());
    }
}
