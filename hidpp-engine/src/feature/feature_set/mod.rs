//! Implements the FeatureSet feature (ID `0x0001`) that allows enumerating all
//! the features supported by a device.

pub mod v0;
