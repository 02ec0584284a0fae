//! Configuration of a [`crate::transport::HidppTransport`].

use std::time::Duration;

use crate::{error::HidppError, nibble::U4};

/// How often engine-internal requests are retried after a timeout or a busy
/// device.
pub const DEFAULT_RETRY_COUNT: u32 = 2;

/// The software ID used when none is configured.
pub const DEFAULT_SOFTWARE_ID: u8 = 0x01;

/// The request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables of a HID++ transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransportConfig {
    /// The software ID included in every HID++2.0 request and used to filter
    /// HID++2.0 notifications.
    ///
    /// Must be in `1..=15`, as `0` is reserved for notifications emitted by
    /// the devices themselves.
    pub software_id: u8,

    /// How long a request may wait for its response before failing with
    /// [`HidppError::Timeout`].
    pub request_timeout: Duration,

    /// How often requests issued by the engine itself (receiver registers,
    /// protocol probes, feature discovery) are retried.
    pub retry_count: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            software_id: DEFAULT_SOFTWARE_ID,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }
}

impl TransportConfig {
    /// Replaces the software ID.
    pub fn with_software_id(mut self, software_id: u8) -> Self {
        self.software_id = software_id;
        self
    }

    /// Replaces the request timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Replaces the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Checks the configuration and returns the validated software ID.
    pub fn validate(&self) -> Result<U4, HidppError> {
        match U4::new(self.software_id) {
            Some(id) if self.software_id != 0 => Ok(id),
            _ => Err(HidppError::InvalidSoftwareId(self.software_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        let config = TransportConfig::default();
        assert_eq!(config.validate().map(U4::to_lo).ok(), Some(0x01));
        assert_eq!(config.retry_count, DEFAULT_RETRY_COUNT);
    }

    #[test]
    fn software_id_must_be_a_non_zero_nibble() {
        for invalid in [0x00, 0x10, 0xff] {
            let config = TransportConfig::default().with_software_id(invalid);
            assert!(matches!(
                config.validate(),
                Err(HidppError::InvalidSoftwareId(id)) if id == invalid
            ));
        }

        assert!(TransportConfig::default().with_software_id(0x0f).validate().is_ok());
    }
}
