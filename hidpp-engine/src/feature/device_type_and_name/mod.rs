//! Implements the DeviceTypeAndName feature (ID `0x0005`) that provides the
//! marketing name and type of a device.

pub mod v0;
