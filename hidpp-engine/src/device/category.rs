//! Maps Logitech product IDs to rough product categories.
//!
//! Product IDs are shared between USB, Bluetooth and the wireless product IDs
//! (WPID) of eQuad receivers, so a single table serves all of them. It is
//! static data and cannot predict future products, but Logitech mostly sticks
//! to the scheme.

use std::ops::RangeInclusive;

use lazy_static::lazy_static;

use crate::protocol::ProtocolFlavor;

/// A product category as derived from a product ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ProductCategory {
    VirtualUsbGameController,
    UsbScanner,
    UsbCamera,
    UsbAudio,
    UsbHub,
    QuadMouse,
    QuadKeyboard,
    QuadGamingDevice,
    QuadFapDevice,
    UsbToolsTransceiver,
    QuadMouseTransceiver,
    QuadDesktopTransceiver,
    QuadGamingTransceiver,
    UsbSpecial,
    BluetoothMouse,
    BluetoothKeyboard,
    BluetoothNumpad,
    BluetoothRemoteControl,
    BluetoothReserved,
    BluetoothAudio,
    UsbMouse,
    UsbRemoteControl,
    UsbPcGamingDevice,
    UsbKeyboard,
    UsbTrackBall,
    UsbReceiver,
    Usb3dControlDevice,
    UsbBluetoothReceiver,
    UsbOtherPointingDevice,
    UsbConsoleGamingDevice,
    UsbToolsCorded,
}

impl ProductCategory {
    /// Checks whether the category is one of the device ranges of eQuad
    /// (Unifying and similar) receivers.
    pub fn is_equad_device(self) -> bool {
        matches!(
            self,
            ProductCategory::QuadMouse
                | ProductCategory::QuadKeyboard
                | ProductCategory::QuadGamingDevice
                | ProductCategory::QuadFapDevice
        )
    }
}

lazy_static! {
    static ref CATEGORY_RANGES: Vec<(RangeInclusive<u16>, ProductCategory)> = {
        use ProductCategory::*;

        let mut ranges = vec![
            (0x0000..=0x00ff, VirtualUsbGameController),
            (0x0400..=0x040f, UsbScanner),
            (0x0800..=0x08ff, UsbCamera),
            (0x0900..=0x09ff, UsbCamera),
            (0x0a00..=0x0aff, UsbAudio),
            (0x0b00..=0x0bff, UsbHub),
            (0x1000..=0x1fff, QuadMouse),
            (0x2000..=0x2fff, QuadKeyboard),
            (0x3000..=0x3fff, QuadGamingDevice),
            (0x4000..=0x4fff, QuadFapDevice),
            (0x5000..=0x5fff, UsbToolsTransceiver),
            (0x8000..=0x87ff, QuadMouseTransceiver),
            (0x8800..=0x88ff, QuadDesktopTransceiver),
            (0x8900..=0x89ff, UsbCamera),
            (0x8a00..=0x8fff, QuadDesktopTransceiver),
            (0x9000..=0x98ff, QuadGamingTransceiver),
            (0x9900..=0x99ff, UsbCamera),
            (0x9a00..=0x9fff, QuadGamingTransceiver),
            (0xa000..=0xafff, UsbSpecial),
            (0xb000..=0xb0ff, BluetoothMouse),
            (0xb300..=0xb3df, BluetoothKeyboard),
            (0xb3e0..=0xb3ff, BluetoothNumpad),
            (0xb400..=0xb4ff, BluetoothRemoteControl),
            (0xb500..=0xb5ff, BluetoothReserved),
            (0xba00..=0xbaff, BluetoothAudio),
            (0xc000..=0xc0ff, UsbMouse),
            (0xc100..=0xc1ff, UsbRemoteControl),
            (0xc200..=0xc2ff, UsbPcGamingDevice),
            (0xc300..=0xc3ff, UsbKeyboard),
            (0xc400..=0xc4ff, UsbTrackBall),
            (0xc500..=0xc5ff, UsbReceiver),
            (0xc600..=0xc6ff, Usb3dControlDevice),
            (0xc700..=0xc7ff, UsbBluetoothReceiver),
            (0xc800..=0xc8ff, UsbOtherPointingDevice),
            (0xca00..=0xccff, UsbConsoleGamingDevice),
            (0xd000..=0xd00f, UsbCamera),
            (0xf000..=0xf00f, UsbToolsTransceiver),
            (0xf010..=0xf010, UsbToolsCorded),
            (0xf011..=0xffff, UsbToolsTransceiver),
        ];

        ranges.sort_by_key(|(range, _)| *range.start());
        ranges
    };
}

/// Tries to infer the product category from a product ID.
///
/// Returns [`None`] for IDs in no known range.
pub fn infer_product_category(product_id: u16) -> Option<ProductCategory> {
    let candidate = CATEGORY_RANGES.partition_point(|(range, _)| *range.start() <= product_id);

    CATEGORY_RANGES[..candidate]
        .last()
        .filter(|(range, _)| range.contains(&product_id))
        .map(|&(_, category)| category)
}

/// Guesses the protocol a device behind a receiver speaks from its wireless
/// product ID.
///
/// This needs to be known before the device is reachable, as it may well be
/// offline when it is discovered.
pub fn infer_protocol_flavor(wireless_product_id: u16) -> ProtocolFlavor {
    match infer_product_category(wireless_product_id) {
        Some(category) if category.is_equad_device() => ProtocolFlavor::FeatureAccessOverRegisterAccess,
        _ => ProtocolFlavor::RegisterAccess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds_are_inclusive() {
        assert_eq!(infer_product_category(0x1000), Some(ProductCategory::QuadMouse));
        assert_eq!(infer_product_category(0x1fff), Some(ProductCategory::QuadMouse));
        assert_eq!(infer_product_category(0xc52b), Some(ProductCategory::UsbReceiver));
        assert_eq!(infer_product_category(0xf010), Some(ProductCategory::UsbToolsCorded));
        assert_eq!(infer_product_category(0xffff), Some(ProductCategory::UsbToolsTransceiver));
    }

    #[test]
    fn gaps_have_no_category() {
        assert_eq!(infer_product_category(0x0100), None);
        assert_eq!(infer_product_category(0x6000), None);
        assert_eq!(infer_product_category(0xc900), None);
    }

    #[test]
    fn equad_devices_speak_feature_access() {
        assert_eq!(
            infer_protocol_flavor(0x1234),
            ProtocolFlavor::FeatureAccessOverRegisterAccess
        );
        assert_eq!(
            infer_protocol_flavor(0x4082),
            ProtocolFlavor::FeatureAccessOverRegisterAccess
        );
        assert_eq!(infer_protocol_flavor(0x5678), ProtocolFlavor::RegisterAccess);
        assert_eq!(infer_protocol_flavor(0x6000), ProtocolFlavor::RegisterAccess);
    }
}
