// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-central-session
//!
//! A Bluetooth Low Energy central-role session manager: scan for nearby
//! peripherals, connect to one, discover its services and characteristics,
//! subscribe to notifications and stream the values it pushes.
//!
//! The manager is a reactive state machine. It issues requests through a
//! [`CentralAdapter`] and advances when the matching [`PlatformEvent`]
//! arrives. [`BtleplugCentral`] is the adapter for real radios; tests drive
//! the manager with fakes.
//!
//! ## Features
//!
//! - **Discovery**: one entry per peripheral, refreshed on every sighting,
//!   with a signal-strength eligibility threshold
//! - **Single session**: connect, discover and subscribe in one flow
//! - **Streaming**: text payloads from every subscribed characteristic
//! - **Writes**: acknowledged writes to the last discovered or a chosen
//!   characteristic
//! - **Resume**: optionally adopt a peripheral the system already has
//!   connected when the adapter powers on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_central_session::{ConnectionState, Result, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (manager, _pump) = SessionManager::with_btleplug(SessionConfig::default()).await?;
//!
//!     // Wait for the adapter to report its state, then scan
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     manager.start_scan()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     let Some(peripheral) = manager.nearest_peripheral() else {
//!         println!("Nothing found");
//!         return manager.shutdown();
//!     };
//!     println!("Connecting to {} ({})", peripheral.display_name(), peripheral.id);
//!
//!     let _values = manager.on_value_received(|characteristic, value| {
//!         println!("{}: {}", characteristic, String::from_utf8_lossy(&value));
//!     });
//!     manager.connect(&peripheral.id)?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     if manager.connection_state() == ConnectionState::Subscribed {
//!         manager.send_message(b"Message from central")?;
//!     }
//!
//!     manager.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod config;
pub mod error;
pub mod session_manager;
pub mod utils;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::{SessionConfig, WriteTarget};
pub use error::{Error, Result, SessionFailure};
pub use session_manager::{SessionEvent, SessionManager};
pub use utils::payload_preview;

// Re-export commonly used types from submodules
pub use ble::adapter::{AdapterState, CentralAdapter, PeripheralId, PlatformEvent, SessionEpoch};
pub use ble::btleplug_central::BtleplugCentral;
pub use ble::connection::{ActiveSession, ConnectionState, ReceivedPayload};
pub use ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
pub use ble::scanner::DiscoveredPeripheral;
pub use ble::uuids::{display_uuid, service_name, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SessionManager<BtleplugCentral>>();
        let _ = std::any::TypeId::of::<SessionEvent>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SessionFailure>();
        let _ = std::any::TypeId::of::<DiscoveredPeripheral>();
        let _ = std::any::TypeId::of::<ActiveSession>();
        let _ = std::any::TypeId::of::<SessionConfig>();
    }

    #[test]
    fn test_payload_preview_export() {
        assert_eq!(payload_preview(b"ok"), "\"ok\"");
    }
}
