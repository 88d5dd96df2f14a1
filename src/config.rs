//! Session manager configuration.

use uuid::Uuid;

use crate::ble::scanner::DiscoveredPeripherals;
use crate::ble::uuids::UART_SERVICE_UUID;

/// Which characteristic [`send_message`](crate::SessionManager::send_message)
/// writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteTarget {
    /// The characteristic discovered last, across all services.
    #[default]
    LastDiscovered,
    /// A specific characteristic.
    Characteristic(Uuid),
}

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Advertisements weaker than this (dBm) are listed but not connectable.
    pub min_rssi: i16,
    /// Target of `send_message`.
    pub write_target: WriteTarget,
    /// Disable notifications on the written characteristic after each send.
    pub mute_after_send: bool,
    /// On power-on, adopt an already connected peripheral or start scanning.
    pub resume_on_power_on: bool,
    /// Service used to look up already connected peripherals.
    pub resume_service: Uuid,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Default event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;

    /// Set the minimum signal strength for connection eligibility.
    pub fn with_min_rssi(mut self, min_rssi: i16) -> Self {
        self.min_rssi = min_rssi;
        self
    }

    /// Set the write target.
    pub fn with_write_target(mut self, target: WriteTarget) -> Self {
        self.write_target = target;
        self
    }

    /// Disable notifications on the written characteristic after each send.
    pub fn with_mute_after_send(mut self, mute: bool) -> Self {
        self.mute_after_send = mute;
        self
    }

    /// Resume (or start scanning) automatically when the adapter powers on.
    pub fn with_resume_on_power_on(mut self, resume: bool) -> Self {
        self.resume_on_power_on = resume;
        self
    }

    /// Set the service used to find already connected peripherals.
    pub fn with_resume_service(mut self, service: Uuid) -> Self {
        self.resume_service = service;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_rssi: DiscoveredPeripherals::DEFAULT_MIN_RSSI,
            write_target: WriteTarget::LastDiscovered,
            mute_after_send: false,
            resume_on_power_on: false,
            resume_service: UART_SERVICE_UUID,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.min_rssi, -100);
        assert_eq!(config.write_target, WriteTarget::LastDiscovered);
        assert!(!config.mute_after_send);
        assert!(!config.resume_on_power_on);
        assert_eq!(config.resume_service, UART_SERVICE_UUID);
    }

    #[test]
    fn test_builders() {
        let target = Uuid::from_u128(7);
        let config = SessionConfig::default()
            .with_min_rssi(-80)
            .with_write_target(WriteTarget::Characteristic(target))
            .with_mute_after_send(true)
            .with_resume_on_power_on(true)
            .with_event_capacity(0);

        assert_eq!(config.min_rssi, -80);
        assert_eq!(config.write_target, WriteTarget::Characteristic(target));
        assert!(config.mute_after_send);
        assert!(config.resume_on_power_on);
        assert_eq!(config.event_capacity, 1);
    }
}
