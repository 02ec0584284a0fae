//! Implements HID++ messaging across one to three HID streams.
//!
//! This includes framing outgoing requests, mapping incoming reports to
//! previously sent requests and forwarding everything else as notifications.
//!
//! HID++ has no request ID. A response is matched to its request by the
//! report header alone, so at most one request per device index can be in
//! flight at any time. Further requests to the same device index wait until
//! the slot is free again.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    config::TransportConfig,
    error::HidppError,
    frame::{FrameHeader, HEADER_LENGTH, MAX_PAYLOAD_LENGTH, ParameterLength, Parameters},
    nibble::U4,
    pool::{BufferPools, PooledBuffer},
    protocol::ProtocolFlavor,
    stream::{HidStream, HidStreams},
};

mod dispatch;
mod pending;
mod reader;
mod retry;
mod slot;

use pending::PendingOperation;
pub use reader::TransportCompletion;
pub use retry::{BUSY_RETRY_DELAY, with_retry};
use slot::{Listeners, SlotTable};
pub use slot::{CustomState, NotificationCallback};

/// Identifies a registered notification listener.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerHandle {
    /// [`None`] for default listeners.
    device_index: Option<u8>,
    id: u64,
}

impl ListenerHandle {
    /// The device index the listener is registered for, or [`None`] for a
    /// default listener.
    pub fn device_index(&self) -> Option<u8> {
        self.device_index
    }
}

/// The state shared between a transport handle and its read loops.
pub(crate) struct Shared {
    streams: HidStreams,
    slots: SlotTable,
    default_listeners: Listeners,
    pools: BufferPools,
    software_id: U4,
    config: TransportConfig,
    next_listener_id: AtomicU64,
    completion: watch::Sender<Option<TransportCompletion>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Marks the transport as closed and fails every pending operation.
    fn close(&self, outcome: TransportCompletion) {
        self.completion.send_replace(Some(outcome));

        for slot in self.slots.materialized() {
            if let Some(operation) = slot.pending() {
                slot.release(&operation);
                operation.fail(HidppError::TransportClosed);
            }
        }
    }

    /// Installs `operation` as the pending operation of its device index,
    /// waiting for the current one to finish first.
    async fn register(
        &self,
        operation: &Arc<PendingOperation>,
        cancel: &CancellationToken,
    ) -> Result<(), HidppError> {
        let slot = self.slots.get(operation.header().device_index);

        loop {
            if cancel.is_cancelled() || operation.is_finished() {
                return Err(HidppError::Cancelled);
            }
            if self.is_closed() {
                return Err(HidppError::TransportClosed);
            }

            let existing = match slot.try_register(operation) {
                Ok(()) => break,
                Err(existing) => existing,
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(HidppError::Cancelled),
                _ = existing.wait() => {},
            }
        }

        // The transport may have been closed after the check above, but before
        // the operation became visible to the final sweep.
        if self.is_closed() {
            slot.release(operation);
            return Err(HidppError::TransportClosed);
        }

        Ok(())
    }
}

/// Represents a HID++ connection built from one to three HID streams.
///
/// Creating a transport immediately starts reading all streams in the
/// background. Reading stops on [`Self::shutdown`], when the handle is
/// dropped, or when a stream ends or fails.
pub struct HidppTransport {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<TransportCompletion>>>,
}

impl Drop for HidppTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl HidppTransport {
    /// Creates a transport and spawns its read loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(streams: HidStreams, config: TransportConfig) -> Result<Self, HidppError> {
        let software_id = config.validate()?;
        if streams.is_empty() {
            return Err(HidppError::NoStreams);
        }

        let shared = Arc::new(Shared {
            streams,
            slots: SlotTable::default(),
            default_listeners: Listeners::default(),
            pools: BufferPools::default(),
            software_id,
            config,
            next_listener_id: AtomicU64::new(0),
            completion: watch::Sender::new(None),
        });

        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(reader::run(Arc::clone(&shared), shutdown.clone()));

        Ok(Self {
            shared,
            shutdown,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The software ID included in HID++2.0 requests.
    pub fn software_id(&self) -> U4 {
        self.shared.software_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn streams(&self) -> &HidStreams {
        &self.shared.streams
    }

    /// The known protocol flavor of a device index.
    pub fn protocol_flavor(&self, device_index: u8) -> ProtocolFlavor {
        self.shared
            .slots
            .peek(device_index)
            .map_or(ProtocolFlavor::Unknown, |slot| slot.flavor())
    }

    /// Records the protocol flavor of a device index, which drives how its
    /// reports are interpreted.
    pub fn set_protocol_flavor(&self, device_index: u8, flavor: ProtocolFlavor) {
        self.shared.slots.get(device_index).set_flavor(flavor);
    }

    /// Registers a listener for notifications of a single device index.
    ///
    /// As long as a device index has listeners, its notifications are not
    /// delivered to the default listeners.
    pub fn add_notification_listener(
        &self,
        device_index: u8,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .slots
            .get(device_index)
            .listeners
            .add(id, Arc::new(callback));

        ListenerHandle {
            device_index: Some(device_index),
            id,
        }
    }

    /// Registers a listener for notifications of every device index without
    /// listeners of its own.
    pub fn add_default_notification_listener(
        &self,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.default_listeners.add(id, Arc::new(callback));

        ListenerHandle {
            device_index: None,
            id,
        }
    }

    /// Removes a listener. Returns whether it was still registered.
    pub fn remove_notification_listener(&self, handle: ListenerHandle) -> bool {
        match handle.device_index {
            Some(device_index) => self
                .shared
                .slots
                .peek(device_index)
                .is_some_and(|slot| slot.listeners.remove(handle.id)),
            None => self.shared.default_listeners.remove(handle.id),
        }
    }

    /// The state upper layers attached to a device index.
    pub fn custom_state(&self, device_index: u8) -> Option<CustomState> {
        self.shared.slots.peek(device_index)?.custom_state()
    }

    /// Attaches state to a device index unless some is attached already, in
    /// which case the current state is returned.
    ///
    /// Only one caller can win, which makes the cell usable as a token for
    /// exclusive ownership of the device index.
    pub fn try_init_custom_state(
        &self,
        device_index: u8,
        state: CustomState,
    ) -> Result<(), CustomState> {
        self.shared.slots.get(device_index).try_init_custom_state(state)
    }

    /// Replaces the state of a device index if it is still `expected`.
    pub fn replace_custom_state(
        &self,
        device_index: u8,
        expected: &CustomState,
        state: Option<CustomState>,
    ) -> bool {
        self.shared
            .slots
            .get(device_index)
            .replace_custom_state(expected, state)
    }

    /// Detaches any state from a device index.
    pub fn clear_custom_state(&self, device_index: u8) -> Option<CustomState> {
        self.shared.slots.peek(device_index)?.clear_custom_state()
    }

    /// Sends a request and decodes the response parameters.
    pub async fn send<Req: Parameters, Resp: Parameters>(
        &self,
        device_index: u8,
        sub_id_or_feature_index: u8,
        address_or_function: u8,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, HidppError> {
        let mut params = [0u8; MAX_PAYLOAD_LENGTH];
        let params = &mut params[..Req::LENGTH.len()];
        request.write_to(params);

        let data = self
            .send_raw(
                device_index,
                sub_id_or_feature_index,
                address_or_function,
                params,
                Some(Resp::LENGTH),
                cancel,
            )
            .await?;

        Ok(Resp::read_from(&data))
    }

    /// Sends a request whose response carries no relevant parameters.
    pub async fn send_ack<Req: Parameters>(
        &self,
        device_index: u8,
        sub_id_or_feature_index: u8,
        address_or_function: u8,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<(), HidppError> {
        let mut params = [0u8; MAX_PAYLOAD_LENGTH];
        let params = &mut params[..Req::LENGTH.len()];
        request.write_to(params);

        self.send_raw(
            device_index,
            sub_id_or_feature_index,
            address_or_function,
            params,
            None,
            cancel,
        )
        .await
        .map(|_| ())
    }

    /// [`Self::send`], retried on timeouts and busy errors.
    pub async fn send_with_retry<Req: Parameters, Resp: Parameters>(
        &self,
        device_index: u8,
        sub_id_or_feature_index: u8,
        address_or_function: u8,
        request: &Req,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Resp, HidppError> {
        with_retry(retry_count, cancel, || {
            self.send(
                device_index,
                sub_id_or_feature_index,
                address_or_function,
                request,
                cancel,
            )
        })
        .await
    }

    /// Sends raw request parameters and waits for the matching response.
    ///
    /// The smallest report able to carry `parameters` is used. The response
    /// parameters are fitted to `response`, or discarded if it is [`None`].
    ///
    /// Fails with [`HidppError::Timeout`] after the configured request timeout
    /// and with [`HidppError::Cancelled`] once `cancel` is triggered. In both
    /// cases the device index is free for the next request right away.
    pub async fn send_raw(
        &self,
        device_index: u8,
        sub_id_or_feature_index: u8,
        address_or_function: u8,
        parameters: &[u8],
        response: Option<ParameterLength>,
        cancel: &CancellationToken,
    ) -> Result<Box<[u8]>, HidppError> {
        let (kind, stream) = self
            .shared
            .streams
            .iter()
            .find(|(kind, _)| kind.can_carry(parameters.len()))
            .ok_or(HidppError::NoSuitableReport {
                length: parameters.len(),
            })?;

        if self.shared.is_closed() {
            return Err(HidppError::TransportClosed);
        }

        let header = FrameHeader {
            report_kind: kind,
            device_index,
            sub_id_or_feature_index,
            address_or_function,
        };

        // Rented buffers are zeroed, which pads the parameters.
        let mut report = self.shared.pools.rent(kind);
        header.write(&mut report);
        report[HEADER_LENGTH..HEADER_LENGTH + parameters.len()].copy_from_slice(parameters);

        let (operation, mut rx) = PendingOperation::new(header, response);
        let attempt = cancel.child_token();
        let writer = tokio::spawn(write_request(
            Arc::clone(&self.shared),
            Arc::clone(stream),
            report,
            Arc::clone(&operation),
            attempt.clone(),
        ));

        let err = tokio::select! {
            biased;
            result = &mut rx => return result.unwrap_or(Err(HidppError::TransportClosed)),
            _ = cancel.cancelled() => HidppError::Cancelled,
            _ = tokio::time::sleep(self.shared.config.request_timeout) => HidppError::Timeout,
        };

        attempt.cancel();
        writer.abort();
        self.shared.slots.get(device_index).release(&operation);

        debug!(device_index, age = ?operation.age(), %err, "abandoning HID++ request");
        if !operation.fail(err) {
            trace!(device_index, "HID++ request completed while being abandoned");
        }

        rx.await.unwrap_or(Err(HidppError::TransportClosed))
    }

    /// Checks whether the transport stopped reading.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The reason the transport stopped reading, if it did.
    pub fn completion(&self) -> Option<TransportCompletion> {
        self.shared.completion.borrow().clone()
    }

    /// Waits until the transport stopped reading.
    pub async fn closed(&self) -> TransportCompletion {
        let mut completion = self.shared.completion.subscribe();

        match completion.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(TransportCompletion::Cancelled),
            Err(_) => TransportCompletion::Cancelled,
        }
    }

    /// Stops reading, closes all streams and waits for the read loops to end.
    pub async fn shutdown(&self) -> TransportCompletion {
        self.shutdown.cancel();

        for (kind, stream) in self.shared.streams.iter() {
            if let Err(err) = stream.close().await {
                debug!(?kind, %err, "could not close HID stream");
            }
        }

        let reader = self.reader.lock().take();
        match reader {
            Some(reader) => reader.await.unwrap_or(TransportCompletion::Cancelled),
            None => self.closed().await,
        }
    }
}

async fn write_request(
    shared: Arc<Shared>,
    stream: Arc<dyn HidStream>,
    report: PooledBuffer,
    operation: Arc<PendingOperation>,
    cancel: CancellationToken,
) {
    let header = *operation.header();

    let result = match shared.register(&operation, &cancel).await {
        Ok(()) => {
            trace!(
                device_index = header.device_index,
                sub_id = format_args!("0x{:02X}", header.sub_id_or_feature_index),
                address = format_args!("0x{:02X}", header.address_or_function),
                report = ?header.report_kind,
                "HID++ TX"
            );
            stream.write(&report).await.map_err(HidppError::from)
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        shared.slots.get(header.device_index).release(&operation);
        operation.fail(err);
    }
}
