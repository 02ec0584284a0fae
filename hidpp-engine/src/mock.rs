//! In-memory HID streams for tests.

use std::{io, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    frame::ReportKind,
    stream::{HidStream, HidStreams},
};

type Inbound = io::Result<Vec<u8>>;

/// A stream whose reads are fed by a [`MockDevice`] and whose writes end up
/// there.
pub(crate) struct MockStream {
    inbound: flume::Receiver<Inbound>,
    written: flume::Sender<Vec<u8>>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: CancellationToken,
}

#[async_trait]
impl HidStream for MockStream {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let next = tokio::select! {
            _ = self.closed.cancelled() => return Ok(0),
            next = self.inbound.recv_async() => next,
        };

        match next {
            Ok(Ok(report)) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            },
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(0),
        }
    }

    async fn write(&self, report: &[u8]) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        self.log.lock().push(report.to_vec());
        let _ = self.written.send(report.to_vec());
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

/// The device side of one or more [`MockStream`]s.
#[derive(Clone)]
pub(crate) struct MockDevice {
    inbound: Vec<(ReportKind, flume::Sender<Inbound>)>,
    written: flume::Receiver<Vec<u8>>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: CancellationToken,
}

impl MockDevice {
    /// Creates one stream per given report kind.
    pub fn new(kinds: &[ReportKind]) -> (HidStreams, Self) {
        let (written_tx, written_rx) = flume::unbounded();
        let log = Arc::new(Mutex::new(Vec::new()));
        let closed = CancellationToken::new();

        let mut streams = HidStreams::new();
        let mut inbound = Vec::new();

        for &kind in kinds {
            let (tx, rx) = flume::unbounded();
            let stream = Arc::new(MockStream {
                inbound: rx,
                written: written_tx.clone(),
                log: Arc::clone(&log),
                closed: closed.clone(),
            });

            streams = match kind {
                ReportKind::Short => streams.with_short(stream),
                ReportKind::Long => streams.with_long(stream),
                ReportKind::VeryLong => streams.with_very_long(stream),
            };
            inbound.push((kind, tx));
        }

        let device = Self {
            inbound,
            written: written_rx,
            log,
            closed,
        };

        (streams, device)
    }

    /// The most common setup: a receiver or corded device exposing short and
    /// long reports.
    pub fn short_and_long() -> (HidStreams, Self) {
        Self::new(&[ReportKind::Short, ReportKind::Long])
    }

    fn sender(&self, kind: ReportKind) -> Option<&flume::Sender<Inbound>> {
        self.inbound
            .iter()
            .find(|(stream_kind, _)| *stream_kind == kind)
            .or_else(|| self.inbound.first())
            .map(|(_, tx)| tx)
    }

    /// Makes the stream matching the report ID return `report` from a read.
    pub fn inject(&self, report: &[u8]) {
        let kind = report
            .first()
            .and_then(|&id| ReportKind::try_from(id).ok())
            .unwrap_or(ReportKind::Short);

        if let Some(tx) = self.sender(kind) {
            let _ = tx.send(Ok(report.to_vec()));
        }
    }

    /// Makes the stream of the given report kind fail its next read.
    pub fn inject_error(&self, kind: ReportKind, err: io::Error) {
        if let Some(tx) = self.sender(kind) {
            let _ = tx.send(Err(err));
        }
    }

    /// Waits for the next written report not yet taken.
    pub async fn next_written(&self) -> Vec<u8> {
        self.written.recv_async().await.unwrap_or_default()
    }

    /// Takes the next written report, if there is one.
    pub fn try_written(&self) -> Option<Vec<u8>> {
        self.written.try_recv().ok()
    }

    /// Every report written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.log.lock().clone()
    }

    /// Ends all streams.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Answers every written report with the reports `responder` returns.
    pub fn serve<F>(&self, responder: F) -> JoinHandle<()>
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let device = self.clone();

        tokio::spawn(async move {
            while let Ok(request) = device.written.recv_async().await {
                for reply in responder(&request) {
                    device.inject(&reply);
                }
            }
        })
    }
}

/// Answers like a HID++2.0 mouse with the features Root, FeatureSet (index 1),
/// DeviceTypeAndName (index 2) and SmartShift (index 3), on any device index.
pub(crate) fn mouse_responder(request: &[u8]) -> Vec<Vec<u8>> {
    const NAME: &[u8] = b"MX Master 3";

    let mut reply = request[..4].to_vec();
    reply.resize(20, 0);
    reply[0] = 0x11;

    let payload = match (request[2], request[3] >> 4) {
        // Root.GetFeature
        (0x00, 0x0) => match u16::from_be_bytes([request[4], request[5]]) {
            0x0001 => vec![0x01, 0x00, 0x01],
            0x0005 => vec![0x02, 0x00, 0x00],
            _ => vec![0x00],
        },
        // Root.Ping
        (0x00, 0x1) => vec![0x04, 0x05, request[6]],
        // FeatureSet.Count
        (0x01, 0x0) => vec![0x03],
        // FeatureSet.GetFeature
        (0x01, 0x1) => match request[4] {
            1 => vec![0x00, 0x01, 0x00, 0x01],
            2 => vec![0x00, 0x05, 0x00, 0x00],
            _ => vec![0x21, 0x10, 0x40, 0x01],
        },
        // DeviceTypeAndName.GetDeviceNameCount
        (0x02, 0x0) => vec![NAME.len() as u8],
        // DeviceTypeAndName.GetDeviceName
        (0x02, 0x1) => NAME[usize::from(request[4]).min(NAME.len())..].to_vec(),
        // DeviceTypeAndName.GetDeviceType
        (0x02, 0x2) => vec![0x03],
        _ => vec![],
    };

    let len = payload.len().min(16);
    reply[4..4 + len].copy_from_slice(&payload[..len]);
    vec![reply]
}
