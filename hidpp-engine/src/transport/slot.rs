//! The per-device-index state table of a transport.

use std::{
    any::Any,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};

use parking_lot::Mutex;

use super::pending::PendingOperation;
use crate::protocol::ProtocolFlavor;

/// A callback invoked with every raw notification report routed to it.
pub type NotificationCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Opaque state attached to a device index by upper layers.
pub type CustomState = Arc<dyn Any + Send + Sync>;

/// A multicast list of notification callbacks.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Mutex<Vec<(u64, NotificationCallback)>>,
}

impl Listeners {
    pub fn add(&self, id: u64, callback: NotificationCallback) {
        self.entries.lock().push((id, callback));
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let len = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != len
    }

    /// Copies the current callbacks so they can be invoked without holding
    /// the lock.
    pub fn snapshot(&self) -> Vec<NotificationCallback> {
        self.entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

/// The state of a single device index.
#[derive(Default)]
pub(crate) struct DeviceSlot {
    flavor: AtomicU8,
    pending: Mutex<Option<Arc<PendingOperation>>>,
    pub listeners: Listeners,
    custom_state: Mutex<Option<CustomState>>,
}

impl DeviceSlot {
    pub fn flavor(&self) -> ProtocolFlavor {
        ProtocolFlavor::from(self.flavor.load(Ordering::Acquire))
    }

    pub fn set_flavor(&self, flavor: ProtocolFlavor) {
        self.flavor.store(flavor.into(), Ordering::Release);
    }

    /// Returns the operation currently occupying the slot.
    pub fn pending(&self) -> Option<Arc<PendingOperation>> {
        self.pending.lock().clone()
    }

    /// Tries to install `operation` as the pending operation of the slot.
    ///
    /// A cell holding an already finished operation counts as free. If the
    /// cell is occupied, the occupying operation is returned so the caller can
    /// wait for it.
    pub fn try_register(
        &self,
        operation: &Arc<PendingOperation>,
    ) -> Result<(), Arc<PendingOperation>> {
        let mut pending = self.pending.lock();

        match pending.as_ref() {
            Some(existing) if !existing.is_finished() => Err(Arc::clone(existing)),
            _ => {
                *pending = Some(Arc::clone(operation));
                Ok(())
            },
        }
    }

    /// Frees the cell, but only if it is still occupied by `operation`.
    pub fn release(&self, operation: &Arc<PendingOperation>) -> bool {
        self.pending
            .lock()
            .take_if(|pending| Arc::ptr_eq(pending, operation))
            .is_some()
    }

    pub fn custom_state(&self) -> Option<CustomState> {
        self.custom_state.lock().clone()
    }

    /// Installs `state` if the cell is empty, returning the current state
    /// otherwise.
    pub fn try_init_custom_state(&self, state: CustomState) -> Result<(), CustomState> {
        let mut current = self.custom_state.lock();

        match current.as_ref() {
            Some(existing) => Err(Arc::clone(existing)),
            None => {
                *current = Some(state);
                Ok(())
            },
        }
    }

    /// Replaces the state, but only if it is still `expected`.
    pub fn replace_custom_state(&self, expected: &CustomState, state: Option<CustomState>) -> bool {
        let mut current = self.custom_state.lock();

        match current.as_ref() {
            Some(existing) if Arc::ptr_eq(existing, expected) => {
                *current = state;
                true
            },
            _ => false,
        }
    }

    pub fn clear_custom_state(&self) -> Option<CustomState> {
        self.custom_state.lock().take()
    }
}

/// A fixed arena of 256 lazily materialized slots, one per device index.
pub(crate) struct SlotTable {
    slots: Box<[OnceLock<DeviceSlot>; 256]>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| OnceLock::new())),
        }
    }
}

impl SlotTable {
    /// Returns the slot of a device index, creating it if necessary.
    pub fn get(&self, device_index: u8) -> &DeviceSlot {
        self.slots[usize::from(device_index)].get_or_init(DeviceSlot::default)
    }

    /// Returns the slot of a device index if it was ever created.
    pub fn peek(&self, device_index: u8) -> Option<&DeviceSlot> {
        self.slots[usize::from(device_index)].get()
    }

    /// Iterates over all slots that were created so far.
    pub fn materialized(&self) -> impl Iterator<Item = &DeviceSlot> {
        self.slots.iter().filter_map(OnceLock::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HidppError,
        frame::{FrameHeader, ReportKind},
    };

    fn operation() -> Arc<PendingOperation> {
        let header = FrameHeader {
            report_kind: ReportKind::Short,
            device_index: 0x01,
            sub_id_or_feature_index: 0x81,
            address_or_function: 0x00,
        };
        PendingOperation::new(header, None).0
    }

    #[test]
    fn slots_are_created_on_first_use() {
        let table = SlotTable::default();
        assert!(table.peek(0x03).is_none());

        table.get(0x03).set_flavor(ProtocolFlavor::FeatureAccess);
        assert_eq!(
            table.peek(0x03).map(DeviceSlot::flavor),
            Some(ProtocolFlavor::FeatureAccess)
        );
        assert_eq!(table.materialized().count(), 1);
        assert_eq!(table.get(0xff).flavor(), ProtocolFlavor::Unknown);
    }

    #[test]
    fn occupied_cell_rejects_registration_until_finished() {
        let slot = DeviceSlot::default();
        let first = operation();
        let second = operation();

        assert!(slot.try_register(&first).is_ok());
        assert!(slot.try_register(&second).is_err_and(|existing| Arc::ptr_eq(&existing, &first)));

        first.fail(HidppError::Timeout);
        assert!(slot.try_register(&second).is_ok());
        assert!(!slot.release(&first));
        assert!(slot.release(&second));
        assert!(slot.pending().is_none());
    }

    #[test]
    fn custom_state_is_claimed_exactly_once() {
        let slot = DeviceSlot::default();
        let a: CustomState = Arc::new(1u32);
        let b: CustomState = Arc::new(2u32);

        assert!(slot.try_init_custom_state(Arc::clone(&a)).is_ok());
        assert!(slot.try_init_custom_state(Arc::clone(&b)).is_err());

        assert!(!slot.replace_custom_state(&b, None));
        assert!(slot.replace_custom_state(&a, Some(Arc::clone(&b))));
        assert!(slot.clear_custom_state().is_some_and(|state| Arc::ptr_eq(&state, &b)));
        assert!(slot.custom_state().is_none());
    }

    #[test]
    fn listeners_can_be_removed_by_id() {
        let listeners = Listeners::default();
        listeners.add(1, Arc::new(|_| {}));
        listeners.add(2, Arc::new(|_| {}));

        assert!(listeners.remove(1));
        assert!(!listeners.remove(1));
        assert_eq!(listeners.snapshot().len(), 1);
    }
}
