//! BLE communication module.
//!
//! The platform contract ([`adapter`]), GATT descriptors, discovered-device
//! bookkeeping and the btleplug backend.

pub mod adapter;
pub mod btleplug_central;
pub mod connection;
pub mod gatt;
pub mod scanner;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{AdapterState, CentralAdapter, PeripheralId, PlatformEvent, SessionEpoch};
pub use btleplug_central::BtleplugCentral;
pub use connection::{ActiveSession, ConnectionState, ReceivedPayload};
pub use gatt::{CharacteristicDescriptor, ServiceDescriptor};
pub use scanner::{DiscoveredPeripheral, DiscoveredPeripherals};
pub use uuids::*;
