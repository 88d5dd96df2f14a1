//! GATT service and characteristic descriptors.
//!
//! Plain values describing what discovery found on the connected
//! peripheral. They carry no platform handles, so snapshots can be handed to
//! consumers freely.

use btleplug::api::{CharPropFlags, Characteristic, Service};
use uuid::Uuid;

/// A service discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

impl ServiceDescriptor {
    /// Create a primary service descriptor.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
        }
    }
}

impl From<&Service> for ServiceDescriptor {
    fn from(service: &Service) -> Self {
        Self {
            uuid: service.uuid,
            primary: service.primary,
        }
    }
}

/// A characteristic discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Properties advertised by the peripheral.
    pub properties: CharPropFlags,
    /// Whether notifications are currently enabled on it.
    pub notifying: bool,
}

impl CharacteristicDescriptor {
    /// Create a descriptor that is not yet notifying.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
            notifying: false,
        }
    }

    /// Check if the peripheral can push values for this characteristic.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }

    /// Check if the characteristic accepts acknowledged writes.
    pub fn can_write(&self) -> bool {
        self.properties.contains(CharPropFlags::WRITE)
    }

    /// Check if this descriptor refers to the given btleplug characteristic.
    pub fn matches(&self, characteristic: &Characteristic) -> bool {
        characteristic.uuid == self.uuid && characteristic.service_uuid == self.service_uuid
    }
}

impl From<&Characteristic> for CharacteristicDescriptor {
    fn from(characteristic: &Characteristic) -> Self {
        Self::new(
            characteristic.uuid,
            characteristic.service_uuid,
            characteristic.properties,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};

    #[test]
    fn test_characteristic_capabilities() {
        let tx = CharacteristicDescriptor::new(
            UART_TX_UUID,
            UART_SERVICE_UUID,
            CharPropFlags::NOTIFY,
        );
        assert!(tx.can_notify());
        assert!(!tx.can_write());
        assert!(!tx.notifying);

        let rx = CharacteristicDescriptor::new(
            UART_RX_UUID,
            UART_SERVICE_UUID,
            CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
        );
        assert!(!rx.can_notify());
        assert!(rx.can_write());
    }

    #[test]
    fn test_characteristic_equality_covers_properties_and_state() {
        let tx = CharacteristicDescriptor::new(
            UART_TX_UUID,
            UART_SERVICE_UUID,
            CharPropFlags::NOTIFY,
        );
        let mut notifying = tx.clone();
        notifying.notifying = true;
        assert_ne!(tx, notifying);

        let indicate = CharacteristicDescriptor::new(
            UART_TX_UUID,
            UART_SERVICE_UUID,
            CharPropFlags::INDICATE,
        );
        assert_ne!(tx, indicate);
        assert_eq!(tx, tx.clone());
    }

    #[test]
    fn test_service_descriptor_is_primary() {
        let service = ServiceDescriptor::new(UART_SERVICE_UUID);
        assert!(service.primary);
        assert_eq!(service.uuid, UART_SERVICE_UUID);
    }
}
