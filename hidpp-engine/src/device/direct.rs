//! Devices attached directly to a transport, without a receiver in between.

use std::{fmt, sync::Arc};

use tokio_util::sync::CancellationToken;

use super::{DIRECT_DEVICE_INDEX, DeviceId, bind_feature, forward_notifications, read_name_and_type};
use crate::{
    error::DeviceError,
    event::EventEmitter,
    feature::{self, CreatableFeature, FeatureTable, device_type_and_name::v0::DeviceType},
    frame::Notification,
    protocol::ProtocolVersion,
    transport::{HidppTransport, ListenerHandle},
};

/// A HID++1.0 device that is not a receiver.
pub struct RegisterAccessDevice {
    transport: Arc<HidppTransport>,
    id: DeviceId,
    notifications: Arc<EventEmitter<Notification>>,
    listener: ListenerHandle,
}

impl RegisterAccessDevice {
    pub(crate) fn new(transport: Arc<HidppTransport>, id: DeviceId) -> Self {
        let (notifications, listener) = forward_notifications(&transport, DIRECT_DEVICE_INDEX);

        Self {
            transport,
            id,
            notifications,
            listener,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The transport, for register requests to [`DIRECT_DEVICE_INDEX`].
    pub fn transport(&self) -> &Arc<HidppTransport> {
        &self.transport
    }

    pub fn listen_notifications(&self) -> flume::Receiver<Notification> {
        self.notifications.create_receiver()
    }

    /// Stops the transport of the device.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

impl Drop for RegisterAccessDevice {
    fn drop(&mut self) {
        self.transport.remove_notification_listener(self.listener);
    }
}

impl fmt::Debug for RegisterAccessDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterAccessDevice")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A HID++2.0 device with its feature table.
pub struct FeatureAccessDevice {
    transport: Arc<HidppTransport>,
    id: DeviceId,
    protocol_version: ProtocolVersion,
    features: FeatureTable,
    name: Option<String>,
    device_type: Option<DeviceType>,
    notifications: Arc<EventEmitter<Notification>>,
    listener: ListenerHandle,
}

impl FeatureAccessDevice {
    /// Discovers the features of the device and reads its name.
    pub(crate) async fn initialize(
        transport: Arc<HidppTransport>,
        id: DeviceId,
        protocol_version: ProtocolVersion,
        cancel: &CancellationToken,
    ) -> Result<Self, DeviceError> {
        let features = feature::discover(&transport, DIRECT_DEVICE_INDEX, cancel).await?;
        let (name, device_type) =
            read_name_and_type(&transport, DIRECT_DEVICE_INDEX, &features, cancel).await?;

        let (notifications, listener) = forward_notifications(&transport, DIRECT_DEVICE_INDEX);

        Ok(Self {
            transport,
            id,
            protocol_version,
            features,
            name,
            device_type,
            notifications,
            listener,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn transport(&self) -> &Arc<HidppTransport> {
        &self.transport
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    /// The marketing name, if the device reports one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.device_type
    }

    /// Binds a feature implementation, if the device supports it.
    pub fn feature<F: CreatableFeature>(&self) -> Option<F> {
        bind_feature(&self.transport, DIRECT_DEVICE_INDEX, &self.features)
    }

    pub fn listen_notifications(&self) -> flume::Receiver<Notification> {
        self.notifications.create_receiver()
    }

    /// Stops the transport of the device.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

impl Drop for FeatureAccessDevice {
    fn drop(&mut self) {
        self.transport.remove_notification_listener(self.listener);
    }
}

impl fmt::Debug for FeatureAccessDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureAccessDevice")
            .field("id", &self.id)
            .field("protocol_version", &self.protocol_version)
            .field("name", &self.name)
            .field("features", &self.features.len())
            .finish_non_exhaustive()
    }
}
