//! Implements HID++1.0 wireless receivers and tracks the devices paired to
//! them.
//!
//! The receiver announces every paired device with a connection notification
//! (sub ID `0x41`) once asked to via [`Receiver::start_watching_devices`], and
//! whenever the link to a device changes afterwards. Notifications are
//! handled on the transport's read path, which must never block. Everything
//! that needs a request is therefore run as a background operation, and events
//! are published from a queue in the order they were raised.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    ConnectionParameters,
    DIRECT_DEVICE_INDEX,
    DeviceId,
    DeviceKind,
    PairedDevice,
    forward_notifications,
};
use crate::{
    error::{DeviceError, HidppError},
    event::EventEmitter,
    frame::Notification,
    protocol::{
        ProtocolFlavor,
        rap::{self, ConnectionAction, Register, notification_flags},
    },
    transport::{CustomState, HidppTransport, ListenerHandle},
};

/// The highest pairing slot whose information can be read from the receiver.
const MAX_PAIRING_SLOT: u8 = 0x0f;

/// Parameters of [`Register::NonVolatileAndPairingInformation`], offset by
/// the pairing slot minus one.
const PAIRING_INFORMATION: u8 = 0x20;
const EXTENDED_PAIRING_INFORMATION: u8 = 0x30;
const DEVICE_NAME: u8 = 0x40;

/// The longest name a receiver stores for a paired device.
const MAX_NAME_LENGTH: usize = 14;

/// An event concerning the devices paired to a [`Receiver`].
#[derive(Clone, Debug)]
pub enum ReceiverEvent {
    /// A device occupying a pairing slot was found. Its link may or may not
    /// be up.
    DeviceDiscovered(Arc<PairedDevice>),

    /// The link to a device came up and the device was initialized.
    DeviceConnected {
        device: Arc<PairedDevice>,
        version: u64,
    },

    /// The link to a previously connected device was lost.
    DeviceDisconnected {
        device: Arc<PairedDevice>,
        version: u64,
    },
}

/// What the receiver stores about a paired device.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PairingInformation {
    pub wireless_product_id: Option<u16>,
    pub kind: Option<DeviceKind>,

    /// The serial number as an upper case hex string.
    pub serial_number: Option<String>,
    pub name: Option<String>,
}

/// An event waiting to be published, carrying the connection version it was
/// raised for.
pub(crate) enum QueuedEvent {
    Discovered(Arc<PairedDevice>),
    Connected(Arc<PairedDevice>, u64),
    Disconnected(Arc<PairedDevice>, u64),
}

type Operation = JoinHandle<Result<(), DeviceError>>;

/// The custom state the receiver attaches to the transport's device index of a
/// pairing slot.
pub(crate) enum ChildEntry {
    /// The device is being created. The channel yields it once it exists, or
    /// closes if creation failed.
    Creating(watch::Receiver<Option<Arc<PairedDevice>>>),

    Present(Arc<PairedDevice>),
}

/// The part of a receiver shared with its paired devices and background
/// operations.
pub(crate) struct ReceiverInner {
    transport: Arc<HidppTransport>,
    watching: AtomicBool,
    events: Mutex<Option<flume::Sender<QueuedEvent>>>,
    operations: Mutex<Option<flume::Sender<Operation>>>,
    shutdown: CancellationToken,
}

impl ReceiverInner {
    pub(crate) fn transport(&self) -> &Arc<HidppTransport> {
        &self.transport
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queues an event for publishing. Dropped once the receiver is shut
    /// down.
    pub(crate) fn enqueue(&self, event: QueuedEvent) {
        if let Some(events) = &*self.events.lock() {
            let _ = events.send(event);
        }
    }

    /// Runs an operation in the background, reporting its failure through the
    /// log.
    ///
    /// Returns `false` if the receiver is shut down and the operation was not
    /// started.
    pub(crate) fn spawn_operation<F>(&self, operation: F) -> bool
    where
        F: Future<Output = Result<(), DeviceError>> + Send + 'static,
    {
        let operations = self.operations.lock();
        let Some(operations) = &*operations else {
            return false;
        };

        let _ = operations.send(tokio::spawn(operation));
        true
    }

    /// Handles a notification of a pairing slot no device is listening on.
    pub(crate) fn handle_notification(self: &Arc<Self>, frame: &[u8]) {
        if !self.watching.load(Ordering::Acquire) {
            return;
        }

        let Some(parameters) = ConnectionParameters::read(frame) else {
            return;
        };

        if parameters.device_index == DIRECT_DEVICE_INDEX {
            return;
        }

        let (created, creating) = watch::channel(None);
        let placeholder: CustomState = Arc::new(ChildEntry::Creating(creating));

        if self
            .transport
            .try_init_custom_state(parameters.device_index, Arc::clone(&placeholder))
            .is_err()
        {
            trace!(
                device_index = parameters.device_index,
                "pairing slot is already occupied"
            );
            return;
        }

        let inner = Arc::clone(self);
        let started = self.spawn_operation({
            let placeholder = Arc::clone(&placeholder);
            async move { inner.create_device(parameters, placeholder, created).await }
        });

        if !started {
            self.transport
                .replace_custom_state(parameters.device_index, &placeholder, None);
        }
    }

    async fn create_device(
        self: Arc<Self>,
        parameters: ConnectionParameters,
        placeholder: CustomState,
        created: watch::Sender<Option<Arc<PairedDevice>>>,
    ) -> Result<(), DeviceError> {
        let device_index = parameters.device_index;

        let pairing = match self
            .read_pairing_information(device_index, &self.shutdown)
            .await
        {
            Ok(pairing) => pairing,
            Err(err) => {
                self.transport
                    .replace_custom_state(device_index, &placeholder, None);
                return Err(err.into());
            },
        };

        let device = PairedDevice::new(&self, parameters, pairing);
        self.transport
            .set_protocol_flavor(device_index, device.protocol_flavor());

        let present: CustomState = Arc::new(ChildEntry::Present(Arc::clone(&device)));
        if !self
            .transport
            .replace_custom_state(device_index, &placeholder, Some(present))
        {
            // The receiver was shut down in the meantime.
            return Ok(());
        }

        device.attach(&self.transport);
        let _ = created.send(Some(Arc::clone(&device)));

        debug!(
            device_index,
            product_id = format_args!("0x{:04X}", device.id().product_id),
            flavor = ?device.protocol_flavor(),
            link_established = parameters.info.link_established,
            "paired device discovered"
        );

        self.enqueue(QueuedEvent::Discovered(Arc::clone(&device)));

        if parameters.info.link_established {
            self.spawn_operation(device.connect(0, self.shutdown_token()));
        }

        Ok(())
    }

    /// Reads what the receiver stores about a pairing slot.
    ///
    /// Information the receiver does not have is left empty.
    pub(crate) async fn read_pairing_information(
        &self,
        device_index: u8,
        cancel: &CancellationToken,
    ) -> Result<PairingInformation, HidppError> {
        if !(1..=MAX_PAIRING_SLOT).contains(&device_index) {
            return Ok(PairingInformation::default());
        }

        let slot = device_index - 1;
        let pairing = self
            .read_pairing_register(PAIRING_INFORMATION + slot, cancel)
            .await?;
        let extended = self
            .read_pairing_register(EXTENDED_PAIRING_INFORMATION + slot, cancel)
            .await?;
        let name = self
            .read_pairing_register(DEVICE_NAME + slot, cancel)
            .await?;

        Ok(PairingInformation {
            wireless_product_id: pairing.map(|data| u16::from_be_bytes([data[3], data[4]])),
            kind: pairing.map(|data| DeviceKind::from(data[7] & 0x0f)),
            serial_number: extended
                .map(|data| format!("{:08X}", u32::from_be_bytes([data[1], data[2], data[3], data[4]]))),
            name: name.and_then(|data| {
                let len = usize::from(data[1]).min(MAX_NAME_LENGTH);
                String::from_utf8(data[2..2 + len].to_vec()).ok()
            }),
        })
    }

    async fn read_pairing_register(
        &self,
        parameter: u8,
        cancel: &CancellationToken,
    ) -> Result<Option<[u8; 16]>, HidppError> {
        let response = self
            .transport
            .get_register_with_parameter_with_retry::<[u8; 16]>(
                DIRECT_DEVICE_INDEX,
                Register::NonVolatileAndPairingInformation.into(),
                parameter,
                self.transport.config().retry_count,
                cancel,
            )
            .await;

        match response {
            Ok(data) => Ok(Some(data)),
            Err(HidppError::RegisterAccess(rap::ErrorCode::InvalidParamValue)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stops accepting events and operations and cancels running ones.
    fn close(&self) {
        self.watching.store(false, Ordering::Release);
        self.shutdown.cancel();
        self.events.lock().take();
        self.operations.lock().take();
    }
}

/// A HID++1.0 receiver and the devices paired to it.
pub struct Receiver {
    inner: Arc<ReceiverInner>,
    id: DeviceId,
    events: Arc<EventEmitter<ReceiverEvent>>,
    notifications: Arc<EventEmitter<Notification>>,
    default_listener: ListenerHandle,
    listener: ListenerHandle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Receiver {
    /// Takes over the transport of a receiver.
    ///
    /// Devices are only tracked after [`Self::start_watching_devices`].
    pub fn new(transport: Arc<HidppTransport>, id: DeviceId) -> Self {
        transport.set_protocol_flavor(DIRECT_DEVICE_INDEX, ProtocolFlavor::RegisterAccess);

        let (event_tx, event_rx) = flume::unbounded();
        let (operation_tx, operation_rx) = flume::unbounded();

        let inner = Arc::new(ReceiverInner {
            transport: Arc::clone(&transport),
            watching: AtomicBool::new(false),
            events: Mutex::new(Some(event_tx)),
            operations: Mutex::new(Some(operation_tx)),
            shutdown: CancellationToken::new(),
        });

        let default_listener = transport.add_default_notification_listener({
            let inner = Arc::downgrade(&inner);

            move |frame| {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_notification(frame);
                }
            }
        });
        let (notifications, listener) = forward_notifications(&transport, DIRECT_DEVICE_INDEX);

        let events = Arc::new(EventEmitter::new());
        let workers = vec![
            tokio::spawn(publish_events(event_rx, Arc::clone(&events))),
            tokio::spawn(supervise_operations(operation_rx)),
        ];

        Self {
            inner,
            id,
            events,
            notifications,
            default_listener,
            listener,
            workers: Mutex::new(workers),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn transport(&self) -> &Arc<HidppTransport> {
        &self.inner.transport
    }

    /// Creates a receiver for device events.
    ///
    /// Events are delivered in the order they were raised.
    pub fn listen(&self) -> flume::Receiver<ReceiverEvent> {
        self.events.create_receiver()
    }

    /// Creates a receiver for notifications of the receiver itself.
    pub fn listen_notifications(&self) -> flume::Receiver<Notification> {
        self.notifications.create_receiver()
    }

    /// Enables connection notifications and asks the receiver to announce
    /// every paired device.
    pub async fn start_watching_devices(&self, cancel: &CancellationToken) -> Result<(), DeviceError> {
        let transport = &self.inner.transport;
        let retry_count = transport.config().retry_count;

        transport
            .set_register_with_retry(
                DIRECT_DEVICE_INDEX,
                Register::EnableHidPlusPlusNotifications.into(),
                &rap::encode_u24(
                    notification_flags::WIRELESS_NOTIFICATIONS | notification_flags::SOFTWARE_PRESENT,
                ),
                retry_count,
                cancel,
            )
            .await?;

        self.inner.watching.store(true, Ordering::Release);

        transport
            .set_register_with_retry(
                DIRECT_DEVICE_INDEX,
                Register::ConnectionState.into(),
                &[u8::from(ConnectionAction::FakeDeviceArrival), 0x00, 0x00],
                retry_count,
                cancel,
            )
            .await?;

        Ok(())
    }

    /// All devices currently occupying a pairing slot.
    ///
    /// Devices still being created are waited for.
    pub async fn current_devices(&self) -> Vec<Arc<PairedDevice>> {
        let entries = (0..DIRECT_DEVICE_INDEX)
            .filter_map(|device_index| self.inner.transport.custom_state(device_index))
            .collect::<Vec<_>>();

        let lookups = entries
            .iter()
            .filter_map(|state| state.downcast_ref::<ChildEntry>())
            .map(|entry| async move {
                match entry {
                    ChildEntry::Present(device) => Some(Arc::clone(device)),
                    ChildEntry::Creating(creating) => {
                        let mut creating = creating.clone();
                        let device = match creating.wait_for(Option::is_some).await {
                            Ok(device) => (*device).clone(),
                            Err(_) => None,
                        };
                        device
                    },
                }
            });

        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Reads what the receiver stores about a pairing slot.
    pub async fn read_pairing_information(
        &self,
        device_index: u8,
        cancel: &CancellationToken,
    ) -> Result<PairingInformation, DeviceError> {
        Ok(self
            .inner
            .read_pairing_information(device_index, cancel)
            .await?)
    }

    /// Stops tracking devices and closes the transport.
    ///
    /// Paired devices are disposed, and event receivers end once drained.
    pub async fn shutdown(&self) {
        self.detach();
        self.inner.transport.shutdown().await;

        for device_index in 0..DIRECT_DEVICE_INDEX {
            let Some(state) = self.inner.transport.clear_custom_state(device_index) else {
                continue;
            };

            if let Some(ChildEntry::Present(device)) = state.downcast_ref::<ChildEntry>() {
                device.dispose(&self.inner.transport);
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        join_all(workers).await;
    }

    fn detach(&self) {
        self.inner.close();
        self.inner
            .transport
            .remove_notification_listener(self.default_listener);
        self.inner
            .transport
            .remove_notification_listener(self.listener);
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.id)
            .field("watching", &self.inner.watching.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Publishes queued events in order, dropping connection changes that were
/// superseded before they got their turn.
async fn publish_events(queue: flume::Receiver<QueuedEvent>, emitter: Arc<EventEmitter<ReceiverEvent>>) {
    while let Ok(event) = queue.recv_async().await {
        let event = match event {
            QueuedEvent::Discovered(device) => ReceiverEvent::DeviceDiscovered(device),
            QueuedEvent::Connected(device, version) => {
                if !device.publish_connection(version, true) {
                    trace!(device_index = device.device_index(), version, "dropping stale connect");
                    continue;
                }

                info!(
                    device_index = device.device_index(),
                    product_id = format_args!("0x{:04X}", device.id().product_id),
                    flavor = ?device.protocol_flavor(),
                    "device connected"
                );
                ReceiverEvent::DeviceConnected { device, version }
            },
            QueuedEvent::Disconnected(device, version) => {
                if !device.publish_connection(version, false) {
                    trace!(device_index = device.device_index(), version, "dropping stale disconnect");
                    continue;
                }

                info!(device_index = device.device_index(), "device disconnected");
                ReceiverEvent::DeviceDisconnected { device, version }
            },
        };

        emitter.emit(event);
    }

    emitter.close();
}

/// Awaits background operations, logging their failures.
async fn supervise_operations(queue: flume::Receiver<Operation>) {
    while let Ok(operation) = queue.recv_async().await {
        match operation.await {
            Ok(Ok(())) => {},
            Ok(Err(DeviceError::Protocol(HidppError::Cancelled))) => {},
            Ok(Err(err)) => warn!("receiver device operation failed: {}", err),
            Err(err) => error!("receiver device operation panicked: {}", err),
        }
    }
}
