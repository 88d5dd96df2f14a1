//! The contract between the session manager and a platform Bluetooth stack.
//!
//! A platform implements [`CentralAdapter`]: every method issues a request and
//! returns immediately. Completion arrives later as a [`PlatformEvent`] which
//! the platform feeds back into
//! [`SessionManager::handle_event`](crate::SessionManager::handle_event).
//! Session-scoped requests carry a [`SessionEpoch`] that the platform echoes
//! in the matching callbacks so stale results can be discarded.

use btleplug::api::{CentralState, WriteType};
use bytes::Bytes;
use uuid::Uuid;

use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::error::Result;

/// Power/authorization state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet reported.
    #[default]
    Unknown,
    /// The stack is restarting.
    Resetting,
    /// The hardware has no BLE support.
    Unsupported,
    /// The application may not use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Ready for use.
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter can accept scan and connect requests.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

impl From<CentralState> for AdapterState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            #[allow(unreachable_patterns)]
            _ => Self::Unknown,
        }
    }
}

/// Stable identifier of a remote peripheral, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create an identifier from its platform string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Tag identifying one connection session.
///
/// Incremented every time a session is created or torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionEpoch(u64);

impl SessionEpoch {
    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callbacks delivered by the platform stack.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The adapter changed power or authorization state.
    AdapterStateChanged(AdapterState),
    /// An advertisement was received while scanning.
    PeripheralDiscovered {
        /// Advertising peripheral.
        peripheral: PeripheralId,
        /// Advertised local name, if any.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// Answer to [`CentralAdapter::retrieve_connected`].
    ConnectedPeripheralsRetrieved {
        /// Peripherals already connected to this host, in platform order.
        peripherals: Vec<PeripheralId>,
    },
    /// A connection request succeeded.
    Connected {
        /// Epoch of the request.
        epoch: SessionEpoch,
        /// Connected peripheral.
        peripheral: PeripheralId,
    },
    /// A connection request failed.
    ConnectFailed {
        /// Epoch of the request.
        epoch: SessionEpoch,
        /// Peripheral that could not be reached.
        peripheral: PeripheralId,
        /// Platform-supplied reason.
        reason: String,
    },
    /// The link to a peripheral went down.
    Disconnected {
        /// Epoch of the session the link belonged to.
        epoch: SessionEpoch,
        /// Disconnected peripheral.
        peripheral: PeripheralId,
        /// Platform-supplied reason, if the disconnect was not requested.
        reason: Option<String>,
    },
    /// Primary service discovery completed.
    ServicesDiscovered {
        /// Epoch of the request.
        epoch: SessionEpoch,
        /// Services in platform order.
        services: Vec<ServiceDescriptor>,
    },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// Epoch of the request.
        epoch: SessionEpoch,
        /// Service the characteristics belong to.
        service: Uuid,
        /// Characteristics in platform order.
        characteristics: Vec<CharacteristicDescriptor>,
    },
    /// The platform confirmed a notify on/off request.
    NotificationStateChanged {
        /// Epoch of the request.
        epoch: SessionEpoch,
        /// Characteristic whose state changed.
        characteristic: Uuid,
        /// Whether notifications are now enabled.
        enabled: bool,
    },
    /// A characteristic value arrived, or the platform failed to deliver one.
    ValueUpdated {
        /// Epoch of the subscription.
        epoch: SessionEpoch,
        /// Source characteristic.
        characteristic: Uuid,
        /// The value, or the platform's error description.
        value: std::result::Result<Bytes, String>,
    },
}

/// Request primitives of a BLE central stack.
///
/// Every method must return without waiting for the radio; results are
/// reported through [`PlatformEvent`]s. Implementations must not call back
/// into the manager from inside a request method.
#[cfg_attr(test, mockall::automock)]
pub trait CentralAdapter: Send + Sync {
    /// Ask for the current adapter state to be reported.
    fn refresh_adapter_state(&self) -> Result<()>;

    /// Start scanning for all advertisers, coalescing duplicates by identifier.
    fn start_scan(&self) -> Result<()>;

    /// Stop scanning.
    fn stop_scan(&self) -> Result<()>;

    /// Look up peripherals already connected to this host that expose `service`.
    fn retrieve_connected(&self, service: Uuid) -> Result<()>;

    /// Open a connection to `peripheral`.
    fn connect(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()>;

    /// Release the connection to `peripheral`.
    fn cancel_connection(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()>;

    /// Discover all services of a connected peripheral.
    fn discover_services(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()>;

    /// Discover all characteristics of one service.
    fn discover_characteristics(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<()>;

    /// Enable or disable value notifications on a characteristic.
    fn set_notify(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        enabled: bool,
    ) -> Result<()>;

    /// Write a value to a characteristic.
    fn write_value(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_ready() {
        assert!(AdapterState::PoweredOn.is_ready());
        assert!(!AdapterState::PoweredOff.is_ready());
        assert!(!AdapterState::Unknown.is_ready());
        assert_eq!(AdapterState::default(), AdapterState::Unknown);
    }

    #[test]
    fn test_adapter_state_from_central_state() {
        assert_eq!(
            AdapterState::from(CentralState::PoweredOn),
            AdapterState::PoweredOn
        );
        assert_eq!(
            AdapterState::from(CentralState::PoweredOff),
            AdapterState::PoweredOff
        );
        assert_eq!(
            AdapterState::from(CentralState::Unknown),
            AdapterState::Unknown
        );
    }

    #[test]
    fn test_epoch_advances() {
        let epoch = SessionEpoch::default();
        assert_eq!(epoch.value(), 0);
        assert_eq!(epoch.next().value(), 1);
        assert!(epoch.next() > epoch);
        assert_eq!(format!("{}", epoch.next()), "#1");
    }

    #[test]
    fn test_peripheral_id_conversions() {
        let id = PeripheralId::from("AA:BB");
        assert_eq!(id.as_str(), "AA:BB");
        assert_eq!(id, PeripheralId::new(String::from("AA:BB")));
        assert_eq!(id.to_string(), "AA:BB");
    }
}
