//! Devices paired to a receiver.
//!
//! A paired device exists as long as its pairing slot is occupied, whether the
//! device is reachable or not. Every connection notification bumps a version
//! counter, and connection state changes are only published for the latest
//! version, so a slow initialization cannot announce a link that was lost in
//! the meantime.

use std::{
    fmt,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    ConnectionParameters,
    DeviceConnectionInfo,
    DeviceId,
    DeviceSource,
    bind_feature,
    category::infer_protocol_flavor,
    check_feature_access_version,
    read_name_and_type,
    receiver::{ChildEntry, PairingInformation, QueuedEvent, ReceiverInner},
};
use crate::{
    error::DeviceError,
    event::EventEmitter,
    feature::{self, CreatableFeature, FeatureTable, device_type_and_name::v0::DeviceType},
    frame::Notification,
    protocol::{ProtocolFlavor, ProtocolVersion, rap::SubId},
    transport::{HidppTransport, ListenerHandle, with_retry},
};

/// A change of the connection state of a paired device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

struct ConnectionTracking {
    info: DeviceConnectionInfo,
    protocol_type: u8,

    /// Incremented on every connection notification.
    version: u64,

    /// The connection state last announced to subscribers.
    published_connected: bool,
}

/// A device occupying a pairing slot of a [`Receiver`](super::Receiver).
pub struct PairedDevice {
    receiver: Weak<ReceiverInner>,
    device_index: u8,
    id: DeviceId,
    flavor: ProtocolFlavor,
    state: ProtocolState,
    pairing: Mutex<PairingInformation>,
    connection: Mutex<ConnectionTracking>,
    listener: Mutex<Option<ListenerHandle>>,
    notifications: EventEmitter<Notification>,
    connection_events: EventEmitter<ConnectionEvent>,
    disposed: AtomicBool,
}

impl PairedDevice {
    pub(crate) fn new(
        receiver: &Arc<ReceiverInner>,
        parameters: ConnectionParameters,
        pairing: PairingInformation,
    ) -> Arc<Self> {
        let flavor = infer_protocol_flavor(parameters.wireless_product_id);
        Arc::new(Self {
            receiver: Arc::downgrade(receiver),
            device_index: parameters.device_index,
            id: DeviceId::new(DeviceSource::EQuad, parameters.wireless_product_id),
            flavor,
            state: ProtocolState::for_flavor(flavor),
            pairing: Mutex::new(pairing),
            connection: Mutex::new(ConnectionTracking {
                info: parameters.info,
                protocol_type: parameters.protocol_type,
                version: 0,
                published_connected: false,
            }),
            listener: Mutex::new(None),
            notifications: EventEmitter::new(),
            connection_events: EventEmitter::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// The pairing slot of the device.
    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The protocol flavor inferred from the wireless product ID.
    pub fn protocol_flavor(&self) -> ProtocolFlavor {
        self.flavor
    }

    pub fn connection_info(&self) -> DeviceConnectionInfo {
        self.connection.lock().info
    }

    /// The wireless protocol type reported by the last connection
    /// notification.
    pub fn protocol_type(&self) -> u8 {
        self.connection.lock().protocol_type
    }

    /// Whether the receiver last reported a working link to the device.
    pub fn is_link_established(&self) -> bool {
        self.connection.lock().info.link_established
    }

    /// Whether subscribers were last told the device is connected.
    pub fn is_connected(&self) -> bool {
        self.connection.lock().published_connected
    }

    pub fn pairing_information(&self) -> PairingInformation {
        self.pairing.lock().clone()
    }

    /// The name of the device.
    ///
    /// Feature access devices report their marketing name once initialized.
    /// Before that, and for register access devices, the name stored in the
    /// receiver is returned.
    pub fn name(&self) -> Option<String> {
        self.state
            .name()
            .or_else(|| self.pairing.lock().name.clone())
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.state.device_type()
    }

    /// The feature table, once a feature access device was initialized.
    pub fn features(&self) -> Option<FeatureTable> {
        self.state.features()
    }

    /// Binds a feature implementation, if the device was initialized and
    /// supports it.
    pub fn feature<F: CreatableFeature>(&self) -> Option<F> {
        let transport = self.transport().ok()?;
        let features = self.state.features()?;

        bind_feature(&transport, self.device_index, &features)
    }

    /// The transport of the receiver the device is paired to.
    pub fn transport(&self) -> Result<Arc<HidppTransport>, DeviceError> {
        Ok(Arc::clone(self.receiver()?.transport()))
    }

    /// Creates a receiver for every notification addressed to the pairing
    /// slot.
    pub fn listen_notifications(&self) -> flume::Receiver<Notification> {
        self.notifications.create_receiver()
    }

    /// Creates a receiver for the connection state changes of this device.
    pub fn listen_connection(&self) -> flume::Receiver<ConnectionEvent> {
        self.connection_events.create_receiver()
    }

    /// Whether the pairing slot was taken over by another device or the
    /// receiver was shut down.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn receiver(&self) -> Result<Arc<ReceiverInner>, DeviceError> {
        self.receiver.upgrade().ok_or(DeviceError::ReceiverGone)
    }

    /// Starts receiving the notifications of the pairing slot.
    pub(crate) fn attach(self: &Arc<Self>, transport: &HidppTransport) {
        let device = Arc::downgrade(self);
        let handle = transport.add_notification_listener(self.device_index, move |frame| {
            if let Some(device) = device.upgrade() {
                device.handle_notification(frame);
            }
        });

        *self.listener.lock() = Some(handle);
    }

    /// Detaches the device from its pairing slot for good.
    pub(crate) fn dispose(&self, transport: &HidppTransport) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.listener.lock().take() {
            transport.remove_notification_listener(handle);
        }

        if let Some(state) = transport.custom_state(self.device_index) {
            let owned = matches!(
                state.downcast_ref::<ChildEntry>(),
                Some(ChildEntry::Present(device)) if std::ptr::eq(Arc::as_ptr(device), self)
            );

            if owned {
                transport.replace_custom_state(self.device_index, &state, None);
            }
        }

        self.notifications.close();
        self.connection_events.close();
    }

    fn handle_notification(self: &Arc<Self>, frame: &[u8]) {
        if self.is_disposed() {
            return;
        }

        if let Some(notification) = Notification::read(frame) {
            self.notifications.emit(notification);
        }

        let Ok(receiver) = self.receiver() else {
            return;
        };

        match frame.get(2).copied().map(SubId::try_from) {
            Some(Ok(SubId::DeviceConnect)) => {
                let Some(parameters) = ConnectionParameters::read(frame) else {
                    return;
                };

                if parameters.wireless_product_id != self.id.product_id {
                    info!(
                        device_index = self.device_index,
                        old = format_args!("0x{:04X}", self.id.product_id),
                        new = format_args!("0x{:04X}", parameters.wireless_product_id),
                        "pairing slot was taken over by another device"
                    );

                    self.dispose(receiver.transport());
                    receiver.handle_notification(frame);
                    return;
                }

                let version = {
                    let mut connection = self.connection.lock();
                    connection.info = parameters.info;
                    connection.protocol_type = parameters.protocol_type;
                    connection.version += 1;
                    connection.version
                };

                if parameters.info.link_established {
                    receiver.spawn_operation(Arc::clone(self).connect(version, receiver.shutdown_token()));
                } else {
                    receiver.enqueue(QueuedEvent::Disconnected(Arc::clone(self), version));
                }
            },
            Some(Ok(SubId::DeviceDisconnect)) => {
                let version = {
                    let mut connection = self.connection.lock();
                    connection.info.link_established = false;
                    connection.version += 1;
                    connection.version
                };

                receiver.enqueue(QueuedEvent::Disconnected(Arc::clone(self), version));
            },
            _ => {},
        }
    }

    /// Initializes the device and queues the connection event for `version`.
    pub(crate) async fn connect(
        self: Arc<Self>,
        version: u64,
        cancel: CancellationToken,
    ) -> Result<(), DeviceError> {
        self.state.initialize(&self, &cancel).await?;

        let receiver = self.receiver()?;
        receiver.enqueue(QueuedEvent::Connected(self, version));

        Ok(())
    }

    /// Records a connection state change about to be announced.
    ///
    /// Returns `false` if the change is outdated or changes nothing, in which
    /// case it must not be announced.
    pub(crate) fn publish_connection(&self, version: u64, connected: bool) -> bool {
        {
            let mut connection = self.connection.lock();
            if self.is_disposed()
                || connection.version != version
                || connection.published_connected == connected
            {
                return false;
            }

            connection.published_connected = connected;
        }

        self.connection_events.emit(if connected {
            ConnectionEvent::Connected
        } else {
            ConnectionEvent::Disconnected
        });

        true
    }
}

impl fmt::Debug for PairedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedDevice")
            .field("device_index", &self.device_index)
            .field("id", &self.id)
            .field("flavor", &self.flavor)
            .field("link_established", &self.is_link_established())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

struct Identity {
    features: FeatureTable,
    name: Option<String>,
    device_type: Option<DeviceType>,
}

/// What happens when the link to a paired device comes up, depending on the
/// protocol it speaks.
enum ProtocolState {
    /// HID++1.0 devices behind a receiver are described by the receiver
    /// alone.
    RegisterAccess,

    /// HID++2.0 devices are probed once, on their first connection.
    FeatureAccess {
        protocol_version: OnceCell<ProtocolVersion>,
        identity: OnceCell<Identity>,
    },
}

impl ProtocolState {
    fn for_flavor(flavor: ProtocolFlavor) -> Self {
        if flavor.is_feature_access() {
            ProtocolState::FeatureAccess {
                protocol_version: OnceCell::new(),
                identity: OnceCell::new(),
            }
        } else {
            ProtocolState::RegisterAccess
        }
    }

    async fn initialize(&self, device: &PairedDevice, cancel: &CancellationToken) -> Result<(), DeviceError> {
        match self {
            ProtocolState::RegisterAccess => {
                let receiver = device.receiver()?;
                let pairing = receiver
                    .read_pairing_information(device.device_index, cancel)
                    .await?;

                *device.pairing.lock() = pairing;
            },
            ProtocolState::FeatureAccess {
                protocol_version,
                identity,
            } => {
                let transport = device.transport()?;
                let retry_count = transport.config().retry_count;

                let version = protocol_version
                    .get_or_try_init(|| async {
                        let version = with_retry(retry_count, cancel, || {
                            transport.get_protocol_version(device.device_index, cancel)
                        })
                        .await?;

                        check_feature_access_version(version)
                    })
                    .await?;

                identity
                    .get_or_try_init(|| async {
                        let features = feature::discover(&transport, device.device_index, cancel).await?;
                        let (name, device_type) =
                            read_name_and_type(&transport, device.device_index, &features, cancel).await?;

                        debug!(
                            device_index = device.device_index,
                            features = features.len(),
                            ?version,
                            "paired device identified"
                        );

                        Ok::<_, DeviceError>(Identity {
                            features,
                            name,
                            device_type,
                        })
                    })
                    .await?;
            },
        }

        Ok(())
    }

    fn identity(&self) -> Option<&Identity> {
        match self {
            ProtocolState::RegisterAccess => None,
            ProtocolState::FeatureAccess { identity, .. } => identity.get(),
        }
    }

    fn name(&self) -> Option<String> {
        self.identity()?.name.clone()
    }

    fn device_type(&self) -> Option<DeviceType> {
        self.identity()?.device_type
    }

    fn features(&self) -> Option<FeatureTable> {
        Some(self.identity()?.features.clone())
    }
}
