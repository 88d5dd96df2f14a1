//! Connection state and the active session record.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::adapter::{PeripheralId, SessionEpoch};
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};

/// Connection state of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Connection requested, waiting for the platform.
    Connecting,
    /// Link established.
    Connected,
    /// Waiting for the service list.
    DiscoveringServices,
    /// Waiting for characteristic lists.
    DiscoveringCharacteristics,
    /// Notifications requested; values may arrive.
    Subscribed,
    /// Teardown in progress.
    Disconnecting,
    /// No link.
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Check if the link is up (any state from Connected to Subscribed).
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::DiscoveringServices
                | Self::DiscoveringCharacteristics
                | Self::Subscribed
        )
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Check if discovery is still running.
    pub fn is_discovering(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringServices | Self::DiscoveringCharacteristics
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::DiscoveringCharacteristics => write!(f, "DiscoveringCharacteristics"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// The most recent value received on any characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPayload {
    /// Source characteristic.
    pub characteristic: Uuid,
    /// Raw bytes.
    pub bytes: Bytes,
    /// The bytes decoded as UTF-8, when they are valid UTF-8.
    pub text: Option<String>,
}

impl ReceivedPayload {
    /// Wrap a payload, decoding it as text if possible.
    pub fn new(characteristic: Uuid, bytes: Bytes) -> Self {
        let text = std::str::from_utf8(&bytes).ok().map(str::to_owned);
        Self {
            characteristic,
            bytes,
            text,
        }
    }
}

/// The single connection session owned by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Connected (or connecting) peripheral.
    pub peripheral_id: PeripheralId,
    /// Epoch tagging this session's requests and callbacks.
    pub epoch: SessionEpoch,
    /// Current connection state.
    pub state: ConnectionState,
    /// Discovered services, in discovery order.
    pub services: Vec<ServiceDescriptor>,
    /// Discovered characteristics, in discovery order across all services.
    pub characteristics: Vec<CharacteristicDescriptor>,
    /// Last value received.
    pub last_payload: Option<ReceivedPayload>,
}

impl ActiveSession {
    pub(crate) fn new(peripheral_id: PeripheralId, epoch: SessionEpoch) -> Self {
        Self {
            peripheral_id,
            epoch,
            state: ConnectionState::Connecting,
            services: Vec::new(),
            characteristics: Vec::new(),
            last_payload: None,
        }
    }

    /// The characteristic discovered last.
    pub fn last_characteristic(&self) -> Option<&CharacteristicDescriptor> {
        self.characteristics.last()
    }

    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Characteristics that currently have notifications enabled.
    pub fn notifying(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
        self.characteristics.iter().filter(|c| c.notifying)
    }

    /// Replace the characteristics of one service, appending the new list.
    pub(crate) fn replace_characteristics(
        &mut self,
        service: Uuid,
        characteristics: Vec<CharacteristicDescriptor>,
    ) {
        self.characteristics.retain(|c| c.service_uuid != service);
        self.characteristics.extend(characteristics);
    }

    pub(crate) fn set_notifying(&mut self, uuid: &Uuid, enabled: bool) -> bool {
        match self.characteristics.iter_mut().find(|c| c.uuid == *uuid) {
            Some(characteristic) => {
                characteristic.notifying = enabled;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::CharPropFlags;
    use pretty_assertions::assert_eq;

    fn characteristic(uuid: u128, service: u128) -> CharacteristicDescriptor {
        CharacteristicDescriptor::new(
            Uuid::from_u128(uuid),
            Uuid::from_u128(service),
            CharPropFlags::NOTIFY,
        )
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Subscribed.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());

        assert!(ConnectionState::DiscoveringServices.is_discovering());
        assert!(!ConnectionState::Subscribed.is_discovering());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Subscribed), "Subscribed");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[test]
    fn test_replace_characteristics_keeps_other_services() {
        let mut session = ActiveSession::new(PeripheralId::from("p1"), SessionEpoch::default());
        session.replace_characteristics(Uuid::from_u128(1), vec![characteristic(10, 1)]);
        session.replace_characteristics(
            Uuid::from_u128(2),
            vec![characteristic(20, 2), characteristic(21, 2)],
        );
        session.replace_characteristics(Uuid::from_u128(1), vec![characteristic(11, 1)]);

        let uuids: Vec<_> = session.characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(
            uuids,
            vec![
                Uuid::from_u128(20),
                Uuid::from_u128(21),
                Uuid::from_u128(11)
            ]
        );
        assert_eq!(
            session.last_characteristic().map(|c| c.uuid),
            Some(Uuid::from_u128(11))
        );
    }

    #[test]
    fn test_set_notifying() {
        let mut session = ActiveSession::new(PeripheralId::from("p1"), SessionEpoch::default());
        session.replace_characteristics(Uuid::from_u128(1), vec![characteristic(10, 1)]);

        assert!(session.set_notifying(&Uuid::from_u128(10), true));
        assert_eq!(session.notifying().count(), 1);
        assert!(!session.set_notifying(&Uuid::from_u128(99), true));
    }

    #[test]
    fn test_received_payload_decodes_text() {
        let payload = ReceivedPayload::new(Uuid::nil(), Bytes::from_static(b"hello"));
        assert_eq!(payload.text.as_deref(), Some("hello"));

        let payload = ReceivedPayload::new(Uuid::nil(), Bytes::from_static(&[0xff, 0xfe]));
        assert_eq!(payload.text, None);
    }
}
