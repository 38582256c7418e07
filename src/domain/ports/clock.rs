//! Clock Port
//!
//! Defines the wall-clock source used for endpoint leases and send timeslots.

/// Source of the current time in unix seconds.
///
/// This is an outbound port so lease arithmetic can be tested without
/// waiting on real time.
pub trait Clock: Send + Sync {
    /// Current time in whole seconds since the unix epoch.
    fn now(&self) -> u64;
}
