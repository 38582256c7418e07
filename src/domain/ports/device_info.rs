//! Device Info Port
//!
//! Defines the interface for the device identity and telemetry that is
//! reported in every session handshake.

use crate::domain::value_objects::NodeId;

/// Identity and telemetry of the local device.
///
/// This is an outbound port. The hardware address comes from the network
/// interface on a real device; tests and the default binary use a fixed value.
pub trait DeviceInfo: Send + Sync {
    /// The 6-byte hardware address of the device.
    fn node_id(&self) -> NodeId;

    /// Battery level in percent.
    fn power_level(&self) -> u8 {
        100
    }

    /// Storage/memory usage in percent.
    fn memory_usage(&self) -> u8 {
        100
    }
}
