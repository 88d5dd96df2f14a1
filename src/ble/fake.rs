//! Recording adapter for exercising the session manager without a radio.

use btleplug::api::WriteType;
use parking_lot::Mutex;
use std::collections::HashSet;
use uuid::Uuid;

use crate::ble::adapter::{CentralAdapter, PeripheralId, SessionEpoch};
use crate::ble::gatt::CharacteristicDescriptor;
use crate::error::{Error, Result};

/// A request issued to the fake platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RefreshAdapterState,
    StartScan,
    StopScan,
    RetrieveConnected(Uuid),
    Connect(SessionEpoch, PeripheralId),
    CancelConnection(SessionEpoch, PeripheralId),
    DiscoverServices(SessionEpoch, PeripheralId),
    DiscoverCharacteristics(SessionEpoch, PeripheralId, Uuid),
    SetNotify(SessionEpoch, PeripheralId, Uuid, bool),
    WriteValue {
        epoch: SessionEpoch,
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
        with_response: bool,
    },
}

/// Records every request; callbacks are injected by the test itself.
#[derive(Debug, Default)]
pub struct RecordingCentral {
    requests: Mutex<Vec<Request>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingCentral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request of the named kind fail.
    pub fn fail(&self, kind: &'static str) {
        self.failing.lock().insert(kind);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut *self.requests.lock())
    }

    fn record(&self, kind: &'static str, request: Request) -> Result<()> {
        if self.failing.lock().contains(kind) {
            return Err(Error::Internal(format!("{} rejected", kind)));
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

impl CentralAdapter for RecordingCentral {
    fn refresh_adapter_state(&self) -> Result<()> {
        self.record("refresh", Request::RefreshAdapterState)
    }

    fn start_scan(&self) -> Result<()> {
        self.record("start_scan", Request::StartScan)
    }

    fn stop_scan(&self) -> Result<()> {
        self.record("stop_scan", Request::StopScan)
    }

    fn retrieve_connected(&self, service: Uuid) -> Result<()> {
        self.record("retrieve", Request::RetrieveConnected(service))
    }

    fn connect(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        self.record("connect", Request::Connect(epoch, peripheral.clone()))
    }

    fn cancel_connection(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        self.record("cancel", Request::CancelConnection(epoch, peripheral.clone()))
    }

    fn discover_services(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        self.record(
            "discover_services",
            Request::DiscoverServices(epoch, peripheral.clone()),
        )
    }

    fn discover_characteristics(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<()> {
        self.record(
            "discover_characteristics",
            Request::DiscoverCharacteristics(epoch, peripheral.clone(), service),
        )
    }

    fn set_notify(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        enabled: bool,
    ) -> Result<()> {
        self.record(
            "set_notify",
            Request::SetNotify(epoch, peripheral.clone(), characteristic.uuid, enabled),
        )
    }

    fn write_value(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.record(
            "write",
            Request::WriteValue {
                epoch,
                peripheral: peripheral.clone(),
                characteristic: characteristic.uuid,
                value: value.to_vec(),
                with_response: matches!(write_type, WriteType::WithResponse),
            },
        )
    }
}
