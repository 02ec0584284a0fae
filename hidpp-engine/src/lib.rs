//! The transport and device engine of Logitech's HID++ protocol.
//!
//! HID++ extends standard [HID](https://en.wikipedia.org/wiki/Human_interface_device)
//! with a request/response protocol used to configure Logitech peripherals
//! and the wireless receivers they are paired to. It comes in two
//! generations: HID++1.0 addresses *registers* and is mostly spoken by
//! receivers, HID++2.0 addresses *features* and is spoken by most modern
//! devices.
//!
//! This crate covers the parts everything else is built on:
//!
//! - [`transport::HidppTransport`] frames requests over up to three HID
//!   streams (short, long and very long reports), matches responses to their
//!   requests and forwards everything else as notifications.
//! - [`device::open`] probes what is behind a set of streams and creates the
//!   matching [`device::Device`].
//! - [`device::Receiver`] tracks the devices paired to a receiver as they
//!   come and go.
//!
//! Logitech kindly provided a [public Google Drive folder](https://drive.google.com/drive/folders/0BxbRzx7vEV7eWmgwazJ3NUFfQ28)
//! with a lot of documentation on HID++, and the [Solaar](https://github.com/pwr-Solaar/Solaar)
//! project is a great reference on how receivers behave in practice.
//!
//! # Quickstart
//!
//! ## Bridge your HID implementation
//!
//! This crate implements the HID++ protocol, not the underlying HID
//! communication, which is left to an external crate of your choice. Provide
//! an implementation of [`stream::HidStream`] for every report kind the
//! device exposes. The trait defines async methods using
//! [`mod@async_trait`], which is re-exported for annotating your
//! implementing type.
//!
//! ## Open a device
//!
//! ```ignore
//! use hidpp_engine::{
//!     config::TransportConfig,
//!     device::{self, Device, DeviceId, DeviceSource, ReceiverEvent},
//!     protocol::ProtocolFlavor,
//!     stream::HidStreams,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let streams = HidStreams::new()
//!     .with_short(my_short_stream)
//!     .with_long(my_long_stream);
//!
//! // The device index 0xFF is probed to find out what we are talking to.
//! let device = device::open(
//!     streams,
//!     TransportConfig::default(),
//!     ProtocolFlavor::Unknown,
//!     DeviceId::new(DeviceSource::Usb, 0xc52b),
//!     &cancel,
//! )
//! .await
//! .expect("could not open device");
//!
//! // A receiver announces its paired devices once we start watching.
//! let Device::Receiver(receiver) = device else {
//!     panic!("no receiver");
//! };
//! let events = receiver.listen();
//! receiver
//!     .start_watching_devices(&cancel)
//!     .await
//!     .expect("could not watch devices");
//!
//! while let Ok(event) = events.recv_async().await {
//!     match event {
//!         ReceiverEvent::DeviceDiscovered(device) => {
//!             println!("paired: {:?}", device.pairing_information());
//!         },
//!         ReceiverEvent::DeviceConnected { device, .. } => {
//!             // HID++2.0 devices are fully probed by now.
//!             println!("connected: {:?} {:?}", device.name(), device.features());
//!         },
//!         ReceiverEvent::DeviceDisconnected { device, .. } => {
//!             println!("disconnected: {}", device.device_index());
//!         },
//!     }
//! }
//! ```
//!
//! ## Talk to features
//!
//! Feature implementations are bound to a device with
//! [`device::FeatureAccessDevice::feature`] or
//! [`device::PairedDevice::feature`]. Features without an implementation in
//! this crate can still be called with
//! [`transport::HidppTransport::feature_request`] and the index from the
//! device's [`feature::FeatureTable`].

pub use async_trait::async_trait;

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod feature;
pub mod frame;
#[cfg(test)]
mod mock;
pub mod nibble;
pub mod pool;
pub mod protocol;
pub mod stream;
pub mod transport;
