//! The read loops, one per stream, and how their outcome is reported.

use std::{io, sync::Arc};

use tokio::{sync::Mutex as AsyncMutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Shared;
use crate::{
    frame::ReportKind,
    stream::{HidStream, is_disconnection},
};

/// Why a transport stopped reading.
///
/// When several streams are read, the first loop to end decides the outcome
/// and cancels the others. A cancellation caused by that is never reported in
/// place of a real fault of another stream.
#[derive(Clone, Debug)]
pub enum TransportCompletion {
    /// A stream reported its end.
    EndOfStream,

    /// The transport was shut down.
    Cancelled,

    /// The device went away.
    DeviceDisconnected,

    /// A stream failed for another reason.
    Fault(Arc<io::Error>),
}

impl TransportCompletion {
    fn from_read_error(err: io::Error) -> Self {
        if is_disconnection(&err) {
            TransportCompletion::DeviceDisconnected
        } else {
            TransportCompletion::Fault(Arc::new(err))
        }
    }

    fn is_failure(&self) -> bool {
        matches!(
            self,
            TransportCompletion::DeviceDisconnected | TransportCompletion::Fault(_)
        )
    }
}

/// Checks the report ID and cuts a report to the length its ID declares.
///
/// Returns [`None`] for reports that are no HID++ reports or too short.
pub(crate) fn validate_report(data: &[u8]) -> Option<&[u8]> {
    let kind = ReportKind::try_from(*data.first()?).ok()?;
    data.get(..kind.frame_length())
}

/// Runs the read loops of all streams until the first one ends.
///
/// Afterwards, every pending operation is failed and the outcome is published
/// through the transport's completion watch.
pub(crate) async fn run(shared: Arc<Shared>, shutdown: CancellationToken) -> TransportCompletion {
    let cancel = shutdown.child_token();

    // Reads stay concurrent, processing is serialized to keep a single order.
    let gate = (shared.streams.len() > 1).then(|| Arc::new(AsyncMutex::new(())));

    let mut loops = JoinSet::new();
    for (kind, stream) in shared.streams.iter() {
        loops.spawn(read_loop(
            Arc::clone(&shared),
            kind,
            Arc::clone(stream),
            gate.clone(),
            cancel.clone(),
        ));
    }

    let mut outcome = match loops.join_next().await {
        Some(result) => flatten(result),
        None => TransportCompletion::EndOfStream,
    };
    cancel.cancel();

    while let Some(result) = loops.join_next().await {
        let other = flatten(result);
        if matches!(outcome, TransportCompletion::Cancelled) && other.is_failure() {
            outcome = other;
        }
    }

    debug!(?outcome, "HID++ read loops stopped");
    shared.close(outcome.clone());
    outcome
}

fn flatten(result: Result<TransportCompletion, tokio::task::JoinError>) -> TransportCompletion {
    result.unwrap_or_else(|err| {
        if err.is_cancelled() {
            TransportCompletion::Cancelled
        } else {
            TransportCompletion::Fault(Arc::new(io::Error::other("HID++ read loop panicked")))
        }
    })
}

async fn read_loop(
    shared: Arc<Shared>,
    kind: ReportKind,
    stream: Arc<dyn HidStream>,
    gate: Option<Arc<AsyncMutex<()>>>,
    cancel: CancellationToken,
) -> TransportCompletion {
    // Large enough for any report, in case a stream carries more than one
    // report kind.
    let mut buf = shared.pools.rent(ReportKind::VeryLong);

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TransportCompletion::Cancelled,
            read = stream.read(&mut buf[..]) => read,
        };

        let len = match read {
            Ok(0) => return TransportCompletion::EndOfStream,
            Ok(len) => len,
            Err(err) => return TransportCompletion::from_read_error(err),
        };

        let Some(frame) = validate_report(&buf[..len.min(buf.len())]) else {
            debug!(
                ?kind,
                len,
                report_id = buf.first().copied().unwrap_or_default(),
                "dropping invalid HID++ report"
            );
            continue;
        };

        match &gate {
            Some(gate) => {
                let _guard = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TransportCompletion::Cancelled,
                    guard = gate.lock() => guard,
                };
                shared.process_frame(frame);
            },
            None => shared.process_frame(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_cut_to_their_declared_length() {
        let mut data = vec![0u8; 64];
        data[0] = 0x10;
        assert_eq!(validate_report(&data).map(<[u8]>::len), Some(7));

        data[0] = 0x11;
        assert_eq!(validate_report(&data[..19]), None);
        assert_eq!(validate_report(&data[..20]).map(<[u8]>::len), Some(20));

        data[0] = 0x20;
        assert_eq!(validate_report(&data), None);
        assert_eq!(validate_report(&[]), None);
    }
}
