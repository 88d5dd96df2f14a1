//! Well-known service and characteristic UUIDs.

use btleplug::api::bleuuid::{uuid_from_u16, BleUuid};
use uuid::Uuid;

// Standard SIG services
/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = uuid_from_u16(0x1800);
/// Generic Attribute service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid = uuid_from_u16(0x1801);
/// Device Information service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180a);
/// Battery service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180f);

// Nordic UART Service (NUS)
/// Nordic UART service UUID. Peripherals already connected with this service
/// are adopted when resuming on power-on.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (central writes).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (peripheral notifies).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Format a UUID for display: 16-bit SIG UUIDs in their short form (`180A`),
/// everything else as an uppercase hyphenated string.
pub fn display_uuid(uuid: &Uuid) -> String {
    match uuid.to_ble_u16() {
        Some(short) => format!("{:04X}", short),
        None => uuid.hyphenated().to_string().to_uppercase(),
    }
}

/// Human-readable name of a well-known service.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    match *uuid {
        GENERIC_ACCESS_SERVICE_UUID => Some("Generic Access"),
        GENERIC_ATTRIBUTE_SERVICE_UUID => Some("Generic Attribute"),
        DEVICE_INFO_SERVICE_UUID => Some("Device Information"),
        BATTERY_SERVICE_UUID => Some("Battery"),
        UART_SERVICE_UUID => Some("Nordic UART"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uuid_short_form() {
        assert_eq!(display_uuid(&DEVICE_INFO_SERVICE_UUID), "180A");
        assert_eq!(display_uuid(&GENERIC_ACCESS_SERVICE_UUID), "1800");
    }

    #[test]
    fn test_display_uuid_long_form() {
        assert_eq!(
            display_uuid(&UART_SERVICE_UUID),
            "6E400001-B5A3-F393-E0A9-E50E24DCCA9E"
        );
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name(&UART_SERVICE_UUID), Some("Nordic UART"));
        assert_eq!(service_name(&BATTERY_SERVICE_UUID), Some("Battery"));
        assert_eq!(
            service_name(&GENERIC_ATTRIBUTE_SERVICE_UUID),
            Some("Generic Attribute")
        );
        // Characteristics are not services.
        assert_eq!(service_name(&UART_TX_UUID), None);
        assert_eq!(service_name(&Uuid::nil()), None);
    }
}
