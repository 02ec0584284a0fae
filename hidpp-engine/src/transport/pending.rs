//! Requests waiting for their response.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{
    sync::{oneshot, watch},
    time::{Duration, Instant},
};

use crate::{
    error::HidppError,
    frame::{FrameHeader, HEADER_LENGTH, ParameterLength, fit_payload},
};

pub(crate) type OperationResult = Result<Box<[u8]>, HidppError>;

/// A request that was (or is about to be) sent and is waiting for a response.
///
/// An operation completes exactly once. Every later attempt to complete or
/// fail it is ignored and reported as such.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    header: FrameHeader,
    created_at: Instant,

    /// The length the response parameters are decoded to, or [`None`] if only
    /// an acknowledgement is expected.
    response: Option<ParameterLength>,

    completion: Mutex<Option<oneshot::Sender<OperationResult>>>,
    finished: watch::Sender<bool>,
}

impl PendingOperation {
    pub fn new(
        header: FrameHeader,
        response: Option<ParameterLength>,
    ) -> (Arc<Self>, oneshot::Receiver<OperationResult>) {
        let (tx, rx) = oneshot::channel();

        let operation = Arc::new(Self {
            header,
            created_at: Instant::now(),
            response,
            completion: Mutex::new(Some(tx)),
            finished: watch::Sender::new(false),
        });

        (operation, rx)
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.lock().is_none()
    }

    /// Completes the operation with the raw response report.
    pub fn complete(&self, frame: &[u8]) -> bool {
        let payload = frame.get(HEADER_LENGTH..).unwrap_or_default();

        let data = match self.response {
            Some(length) => fit_payload(payload, length),
            None => Box::default(),
        };

        self.finish(Ok(data))
    }

    pub fn fail(&self, err: HidppError) -> bool {
        self.finish(Err(err))
    }

    fn finish(&self, result: OperationResult) -> bool {
        let Some(tx) = self.completion.lock().take() else {
            return false;
        };

        // The waiting side may have given up already.
        let _ = tx.send(result);
        self.finished.send_replace(true);
        true
    }

    /// Waits until the operation completed in any way.
    pub async fn wait(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ReportKind;

    fn header() -> FrameHeader {
        FrameHeader {
            report_kind: ReportKind::Long,
            device_index: 0x02,
            sub_id_or_feature_index: 0x00,
            address_or_function: 0x11,
        }
    }

    #[tokio::test]
    async fn completes_exactly_once() {
        let (operation, rx) = PendingOperation::new(header(), Some(ParameterLength::Short));

        assert!(operation.complete(&[0x11, 0x02, 0x00, 0x11, 0x04, 0x05, 0x06, 0x07]));
        assert!(!operation.fail(HidppError::Timeout));
        assert!(!operation.complete(&[0x11, 0x02, 0x00, 0x11, 0x00, 0x00, 0x00]));
        assert!(operation.is_finished());

        let data = rx.await.ok().and_then(Result::ok);
        assert_eq!(data.as_deref(), Some(&[0x04, 0x05, 0x06][..]));
        operation.wait().await;
    }

    #[tokio::test]
    async fn short_response_is_zero_extended() {
        let (operation, rx) = PendingOperation::new(header(), Some(ParameterLength::Long));
        operation.complete(&[0x10, 0x02, 0x00, 0x11, 0xaa, 0xbb, 0xcc]);

        let data = rx.await.ok().and_then(Result::ok).unwrap_or_default();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..3], &[0xaa, 0xbb, 0xcc]);
        assert!(data[3..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn acknowledgements_carry_no_payload() {
        let (operation, rx) = PendingOperation::new(header(), None);
        operation.complete(&[0x10, 0x02, 0x00, 0x11, 0xaa, 0xbb, 0xcc]);

        assert!(rx.await.ok().and_then(Result::ok).is_some_and(|data| data.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn age_counts_from_creation() {
        let (operation, _rx) = PendingOperation::new(header(), None);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(operation.age() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn waiters_are_released_by_failure() {
        let (operation, _rx) = PendingOperation::new(header(), None);

        let waiter = tokio::spawn({
            let operation = Arc::clone(&operation);
            async move { operation.wait().await }
        });

        operation.fail(HidppError::Cancelled);
        assert!(waiter.await.is_ok());
    }
}
