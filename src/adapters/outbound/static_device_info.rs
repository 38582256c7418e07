//! Static Device Info
//!
//! Implements DeviceInfo with a node id fixed at construction, typically
//! taken from configuration.

use crate::domain::ports::DeviceInfo;
use crate::domain::value_objects::NodeId;

/// Device identity with fixed telemetry readings.
#[derive(Debug, Clone)]
pub struct StaticDeviceInfo {
    node_id: NodeId,
    power_level: u8,
    memory_usage: u8,
}

impl StaticDeviceInfo {
    /// Identity with telemetry reported as 100/100.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            power_level: 100,
            memory_usage: 100,
        }
    }

    pub fn with_telemetry(mut self, power_level: u8, memory_usage: u8) -> Self {
        self.power_level = power_level.min(100);
        self.memory_usage = memory_usage.min(100);
        self
    }
}

impl DeviceInfo for StaticDeviceInfo {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn power_level(&self) -> u8 {
        self.power_level
    }

    fn memory_usage(&self) -> u8 {
        self.memory_usage
    }
}
