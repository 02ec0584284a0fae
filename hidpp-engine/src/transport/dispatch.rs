//! Receive-side processing: matching reports to pending operations, decoding
//! error reports and filtering notifications.
//!
//! Two control bytes are ambiguous between the protocol generations. `0x8F`
//! is the HID++1.0 error sub ID but also a valid HID++2.0 feature index, and
//! `0xFF` is the HID++2.0 error feature index but also a valid HID++1.0 sub
//! ID. The known [`ProtocolFlavor`] of the device index settles this. If it is
//! unknown, the pending operation is used as a best-effort hint.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tracing::{debug, error, trace};

use super::{
    Shared,
    pending::PendingOperation,
    slot::{DeviceSlot, NotificationCallback},
};
use crate::{
    error::HidppError,
    frame::{FrameHeader, ReportKind},
    nibble::U4,
    protocol::{ProtocolFlavor, fap, rap},
};

/// What a received report is, as far as request correlation is concerned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum FrameClass {
    /// A HID++1.0 error report (sub ID `0x8F`).
    RegisterAccessError,

    /// A HID++2.0 error report (feature index `0xFF`).
    FeatureAccessError,

    /// A response or a notification.
    Regular,
}

/// Decides whether a report is an error report.
pub(crate) fn classify(
    header: &FrameHeader,
    flavor: ProtocolFlavor,
    pending: Option<&FrameHeader>,
) -> FrameClass {
    match header.sub_id_or_feature_index {
        // 0xFF is a regular sub ID for HID++1.0.
        0xff if flavor == ProtocolFlavor::RegisterAccess => FrameClass::Regular,
        0xff => FrameClass::FeatureAccessError,

        // HID++1.0 errors are always short.
        0x8f if header.report_kind == ReportKind::Short => {
            let feature_access = flavor.is_feature_access()
                || (flavor == ProtocolFlavor::Unknown
                    && pending.is_some_and(|pending| pending.sub_id_or_feature_index == 0x8f));

            if feature_access {
                FrameClass::Regular
            } else {
                FrameClass::RegisterAccessError
            }
        },

        _ => FrameClass::Regular,
    }
}

/// Decides whether a report that matched no pending operation is forwarded as
/// a notification.
pub(crate) fn admits_notification(header: &FrameHeader, flavor: ProtocolFlavor, software_id: U4) -> bool {
    let foreign_id = header.software_id();
    let own_or_device = foreign_id == U4::default() || foreign_id == software_id;

    match flavor {
        // Evicts reports matching neither a HID++1.0 nor a HID++2.0
        // notification.
        ProtocolFlavor::Unknown => header.sub_id_or_feature_index < 0x80 || own_or_device,
        ProtocolFlavor::RegisterAccess => header.sub_id_or_feature_index < 0x80,
        ProtocolFlavor::FeatureAccess => own_or_device,
        ProtocolFlavor::FeatureAccessOverRegisterAccess => {
            own_or_device
                || header.sub_id_or_feature_index == u8::from(rap::SubId::DeviceConnect)
                || header.sub_id_or_feature_index == u8::from(rap::SubId::DeviceDisconnect)
        },
    }
}

impl Shared {
    /// Processes a single validated report.
    pub(super) fn process_frame(&self, frame: &[u8]) {
        let Some(header) = FrameHeader::read(frame) else {
            debug!(len = frame.len(), "dropping malformed HID++ report");
            return;
        };

        trace!(
            device_index = header.device_index,
            sub_id = format_args!("0x{:02X}", header.sub_id_or_feature_index),
            address = format_args!("0x{:02X}", header.address_or_function),
            "HID++ RX"
        );

        // Snapshot both, as they may change concurrently.
        let slot = self.slots.peek(header.device_index);
        let flavor = slot.map_or(ProtocolFlavor::Unknown, DeviceSlot::flavor);
        let pending = slot.and_then(DeviceSlot::pending);

        let class = classify(&header, flavor, pending.as_ref().map(|op| op.header()));
        if class != FrameClass::Regular {
            self.process_error(frame, class, slot, pending.as_ref());
            return;
        }

        if let (Some(slot), Some(operation)) = (slot, &pending) {
            if operation.header().correlates(&header) {
                slot.release(operation);
                operation.complete(frame);
                return;
            }
        }

        if !admits_notification(&header, flavor, self.software_id) {
            debug!(
                device_index = header.device_index,
                sub_id = format_args!("0x{:02X}", header.sub_id_or_feature_index),
                ?flavor,
                "dropping HID++ report matching no request or notification"
            );
            return;
        }

        self.deliver_notification(slot, frame);
    }

    fn process_error(
        &self,
        frame: &[u8],
        class: FrameClass,
        slot: Option<&DeviceSlot>,
        pending: Option<&Arc<PendingOperation>>,
    ) {
        let code = frame.get(5).copied().unwrap_or_default();

        // The error report echoes the sub ID/feature index and the
        // address/function of the failed request.
        let matched = pending.filter(|operation| {
            let header = operation.header();
            frame.get(3) == Some(&header.sub_id_or_feature_index)
                && frame.get(4) == Some(&header.address_or_function)
        });

        let (Some(slot), Some(operation)) = (slot, matched) else {
            debug!(
                device_index = frame.get(1).copied().unwrap_or_default(),
                code = format_args!("0x{:02X}", code),
                ?class,
                "dropping HID++ error report matching no request"
            );
            return;
        };

        let err = match class {
            FrameClass::RegisterAccessError => HidppError::RegisterAccess(rap::ErrorCode::from(code)),
            _ => HidppError::FeatureAccess(fap::ErrorCode::from(code)),
        };

        slot.release(operation);
        operation.fail(err);
    }

    /// Delivers a notification to the device index's listeners, or to the
    /// default listeners if the device index has none.
    fn deliver_notification(&self, slot: Option<&DeviceSlot>, frame: &[u8]) {
        let callbacks = slot
            .map(|slot| slot.listeners.snapshot())
            .filter(|callbacks| !callbacks.is_empty())
            .unwrap_or_else(|| self.default_listeners.snapshot());

        for callback in callbacks {
            invoke(&callback, frame);
        }
    }
}

fn invoke(callback: &NotificationCallback, frame: &[u8]) {
    if catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
        error!(
            device_index = frame.get(1).copied().unwrap_or_default(),
            "HID++ notification listener panicked"
        );
    }
}
