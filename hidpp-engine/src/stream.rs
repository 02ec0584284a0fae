//! The byte-stream collaborator HID++ is carried over.
//!
//! This crate implements the HID++ protocol, not the underlying HID
//! communication. Opening device interfaces and moving raw reports is left to
//! an external crate of your choice, bridged through [`HidStream`].

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;

use crate::frame::ReportKind;

/// `ENODEV`, returned by Linux and macOS once the device was unplugged.
#[cfg(unix)]
const DEVICE_NOT_CONNECTED_OS_ERROR: i32 = 19;

/// `ERROR_DEVICE_NOT_CONNECTED`.
#[cfg(windows)]
const DEVICE_NOT_CONNECTED_OS_ERROR: i32 = 1167;

#[cfg(not(any(unix, windows)))]
const DEVICE_NOT_CONNECTED_OS_ERROR: i32 = -1;

/// Represents a full-duplex HID channel carrying reports of one fixed size.
///
/// Implementations must support being read and written concurrently, as the
/// transport keeps a read pending at all times.
#[async_trait]
pub trait HidStream: Send + Sync + 'static {
    /// Reads one raw report, including the report ID, into `buf`.
    ///
    /// Returns the amount of bytes read. `Ok(0)` signals the end of the
    /// stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one raw report, including the report ID.
    async fn write(&self, report: &[u8]) -> io::Result<()>;

    /// Closes the stream, making pending and future reads return.
    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// The one to three streams a transport is built from, one per report kind.
#[derive(Clone, Default)]
pub struct HidStreams {
    pub short: Option<Arc<dyn HidStream>>,
    pub long: Option<Arc<dyn HidStream>>,
    pub very_long: Option<Arc<dyn HidStream>>,
}

impl fmt::Debug for HidStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidStreams")
            .field("short", &self.short.is_some())
            .field("long", &self.long.is_some())
            .field("very_long", &self.very_long.is_some())
            .finish()
    }
}

impl HidStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stream carrying short (7 bytes) reports.
    pub fn with_short(mut self, stream: Arc<dyn HidStream>) -> Self {
        self.short = Some(stream);
        self
    }

    /// Sets the stream carrying long (20 bytes) reports.
    pub fn with_long(mut self, stream: Arc<dyn HidStream>) -> Self {
        self.long = Some(stream);
        self
    }

    /// Sets the stream carrying very long (64 bytes) reports.
    pub fn with_very_long(mut self, stream: Arc<dyn HidStream>) -> Self {
        self.very_long = Some(stream);
        self
    }

    /// Returns the stream for reports of the given kind, if there is one.
    pub fn get(&self, kind: ReportKind) -> Option<&Arc<dyn HidStream>> {
        match kind {
            ReportKind::Short => self.short.as_ref(),
            ReportKind::Long => self.long.as_ref(),
            ReportKind::VeryLong => self.very_long.as_ref(),
        }
    }

    /// Checks whether a stream for the given report kind exists.
    pub fn supports(&self, kind: ReportKind) -> bool {
        self.get(kind).is_some()
    }

    /// Iterates over all present streams, smallest report kind first.
    pub fn iter(&self) -> impl Iterator<Item = (ReportKind, &Arc<dyn HidStream>)> {
        ReportKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|stream| (kind, stream)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }
}

/// Checks whether an I/O error means the device went away.
pub fn is_disconnection(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
        || matches!(err.raw_os_error(), Some(code) if code == DEVICE_NOT_CONNECTED_OS_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn streams_iterate_smallest_first() {
        let (streams, _device) = MockDevice::new(&[ReportKind::VeryLong, ReportKind::Short]);

        let kinds = streams.iter().map(|(kind, _)| kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![ReportKind::Short, ReportKind::VeryLong]);
        assert!(!streams.supports(ReportKind::Long));
        assert_eq!(streams.len(), 2);
        assert!(HidStreams::new().is_empty());
    }

    #[test]
    fn disconnection_is_recognized_from_kind_and_os_code() {
        assert!(is_disconnection(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(is_disconnection(&io::Error::from_raw_os_error(
            DEVICE_NOT_CONNECTED_OS_ERROR
        )));
        assert!(!is_disconnection(&io::Error::from(io::ErrorKind::TimedOut)));
    }
}
