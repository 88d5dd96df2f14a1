//! Central-role session manager.
//!
//! Tracks adapter power state, runs the scan, and drives a single
//! connection through service discovery, characteristic discovery and
//! notification subscription. All of it is reactive: the manager issues
//! requests to a [`CentralAdapter`] and advances only when the matching
//! [`PlatformEvent`] comes back through [`SessionManager::handle_event`].
//!
//! Scanning and an active session are mutually exclusive. Starting a scan
//! tears down the session; connecting stops the scan.

use btleplug::api::WriteType;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterState, CentralAdapter, PeripheralId, PlatformEvent, SessionEpoch};
use crate::ble::connection::{ActiveSession, ConnectionState, ReceivedPayload};
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::scanner::{DiscoveredPeripheral, DiscoveredPeripherals};
use crate::callback::CallbackHandle;
use crate::config::{SessionConfig, WriteTarget};
use crate::error::{Error, Result, SessionFailure};
use crate::utils::payload_preview;

/// Event delivered to consumers of the manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The adapter changed power or authorization state.
    AdapterStateChanged(AdapterState),
    /// A peripheral was sighted for the first time or seen again.
    PeripheralDiscovered(DiscoveredPeripheral),
    /// The active session moved to a new state.
    SessionStateChanged {
        /// Session peripheral.
        peripheral: PeripheralId,
        /// New state.
        state: ConnectionState,
    },
    /// A notification carried a valid text payload.
    ValueReceived {
        /// Source characteristic.
        characteristic: Uuid,
        /// Raw payload.
        value: Bytes,
    },
    /// The active session ended because of a failure.
    SessionFailed(SessionFailure),
}

struct ManagerState {
    adapter_state: AdapterState,
    scanning: bool,
    discovered: DiscoveredPeripherals,
    session: Option<ActiveSession>,
    epoch: SessionEpoch,
    resume_pending: bool,
}

/// Owns the scan, the discovered set and the single active session.
pub struct SessionManager<A: CentralAdapter> {
    /// Platform request surface.
    adapter: A,
    /// Configuration.
    config: SessionConfig,
    /// Everything mutable, behind one lock.
    state: Mutex<ManagerState>,
    /// Event channel.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl<A: CentralAdapter> SessionManager<A> {
    /// Create a manager over a platform adapter.
    pub fn new(adapter: A, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            adapter,
            state: Mutex::new(ManagerState {
                adapter_state: AdapterState::Unknown,
                scanning: false,
                discovered: DiscoveredPeripherals::new(config.min_rssi),
                session: None,
                epoch: SessionEpoch::default(),
                resume_pending: false,
            }),
            config,
            event_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Operations ===

    /// Clear the discovered set and start scanning.
    ///
    /// Any active session is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterNotReady`] unless the adapter is powered on.
    pub fn start_scan(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.start_scan_locked(&mut state)
    }

    /// Stop scanning. Does nothing if no scan is running.
    pub fn stop_scan(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.stop_scan_locked(&mut state)
    }

    /// Connect to a peripheral from the current discovered set.
    ///
    /// Stops the scan. A session to a different peripheral is replaced; a
    /// request for the peripheral already in session is a no-op. Completion
    /// is reported through [`SessionEvent::SessionStateChanged`].
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPeripheral`] if the id was not discovered in this scan
    /// - [`Error::AdapterNotReady`] if the adapter is not powered on
    /// - [`Error::SignalTooWeak`] if its last sighting was below the threshold
    /// - [`Error::ConnectFailed`] if the platform rejected the request
    pub fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let mut state = self.state.lock();
        self.connect_locked(&mut state, peripheral)
    }

    /// Tear down the active session: disable notifications, then release the
    /// connection. Does nothing if there is no session.
    pub fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !self.teardown_session(&mut state) {
            debug!("No active session, ignoring disconnect request");
        }
        Ok(())
    }

    /// Write a message with an acknowledged write to the configured target
    /// (by default the characteristic discovered last).
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless the session is subscribed
    /// - [`Error::NoCharacteristic`] if no characteristic was discovered
    /// - [`Error::CharacteristicNotFound`] if the configured target is missing
    pub fn send_message(&self, message: &[u8]) -> Result<()> {
        let target = match self.config.write_target {
            WriteTarget::LastDiscovered => None,
            WriteTarget::Characteristic(uuid) => Some(uuid),
        };
        self.write_locked(target, message)
    }

    /// Write a message with an acknowledged write to a specific characteristic.
    pub fn send_message_to(&self, characteristic: Uuid, message: &[u8]) -> Result<()> {
        self.write_locked(Some(characteristic), message)
    }

    /// Stop scanning and disconnect.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down session manager");

        let mut state = self.state.lock();
        state.resume_pending = false;
        self.teardown_session(&mut state);
        self.stop_scan_locked(&mut state)
    }

    // === Snapshots ===

    /// Last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.state.lock().adapter_state
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// All peripherals discovered since the last scan started.
    pub fn discovered_peripherals(&self) -> Vec<DiscoveredPeripheral> {
        self.state.lock().discovered.to_vec()
    }

    /// Look up one discovered peripheral.
    pub fn discovered_peripheral(&self, id: &PeripheralId) -> Option<DiscoveredPeripheral> {
        self.state.lock().discovered.get(id).cloned()
    }

    /// Get the nearest connectable peripheral by signal strength.
    pub fn nearest_peripheral(&self) -> Option<DiscoveredPeripheral> {
        self.state
            .lock()
            .discovered
            .iter()
            .filter(|p| p.connectable)
            .max_by_key(|p| p.rssi.unwrap_or(i16::MIN))
            .cloned()
    }

    /// Snapshot of the active session.
    pub fn session(&self) -> Option<ActiveSession> {
        self.state.lock().session.clone()
    }

    /// State of the active session, `Disconnected` if there is none.
    pub fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The platform adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    // === Events ===

    /// Subscribe to all events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for every event.
    ///
    /// The callback runs on a tokio task, not on the caller's thread.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.register(move |event| {
            callback(event);
        })
    }

    /// Register a callback for adapter state changes.
    pub fn on_adapter_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(AdapterState) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::AdapterStateChanged(state) = event {
                callback(state);
            }
        })
    }

    /// Register a callback for discovered or refreshed peripherals.
    pub fn on_peripheral_discovered<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DiscoveredPeripheral) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::PeripheralDiscovered(peripheral) = event {
                callback(peripheral);
            }
        })
    }

    /// Register a callback for session state changes.
    pub fn on_session_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&PeripheralId, ConnectionState) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::SessionStateChanged { peripheral, state } = event {
                callback(&peripheral, state);
            }
        })
    }

    /// Register a callback for received values.
    pub fn on_value_received<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Uuid, Bytes) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::ValueReceived {
                characteristic,
                value,
            } = event
            {
                callback(characteristic, value);
            }
        })
    }

    /// Register a callback for session failures.
    pub fn on_session_failed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionFailure) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::SessionFailed(failure) = event {
                callback(failure);
            }
        })
    }

    fn register<F>(&self, dispatch: F) -> CallbackHandle
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatch(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Callback {} lagged, skipped {} events", callback_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Platform callbacks ===

    /// Feed one platform callback into the state machine.
    pub fn handle_event(&self, event: PlatformEvent) {
        let mut state = self.state.lock();

        match event {
            PlatformEvent::AdapterStateChanged(adapter_state) => {
                self.on_adapter_state(&mut state, adapter_state);
            }
            PlatformEvent::PeripheralDiscovered {
                peripheral,
                name,
                rssi,
            } => {
                if !state.scanning {
                    trace!("Ignoring advertisement from {} while not scanning", peripheral);
                    return;
                }
                let entry = state.discovered.record(peripheral, name, rssi);
                if entry.connectable {
                    debug!("Discovered {} ({}) at {:?} dBm", entry.id, entry.display_name(), entry.rssi);
                } else {
                    debug!("Discovered {} not in expected range, at {:?} dBm", entry.id, entry.rssi);
                }
                self.emit(SessionEvent::PeripheralDiscovered(entry));
            }
            PlatformEvent::ConnectedPeripheralsRetrieved { peripherals } => {
                self.on_connected_retrieved(&mut state, peripherals);
            }
            PlatformEvent::Connected { epoch, peripheral } => {
                self.on_connected(&mut state, epoch, &peripheral);
            }
            PlatformEvent::ConnectFailed {
                epoch,
                peripheral,
                reason,
            } => {
                if Self::session_mut(&mut state, epoch).is_none() {
                    trace!("Ignoring stale connect failure for {} ({})", peripheral, epoch);
                    return;
                }
                warn!("Failed to connect to {}: {}", peripheral, reason);
                self.fail_session(
                    &mut state,
                    SessionFailure::ConnectFailed {
                        peripheral: peripheral.to_string(),
                        reason,
                    },
                );
            }
            PlatformEvent::Disconnected {
                epoch,
                peripheral,
                reason,
            } => {
                if Self::session_mut(&mut state, epoch).is_none() {
                    trace!("Ignoring stale disconnect of {} ({})", peripheral, epoch);
                    return;
                }
                info!("Peripheral {} disconnected ({:?})", peripheral, reason);
                self.drop_session(&mut state);
            }
            PlatformEvent::ServicesDiscovered { epoch, services } => {
                self.on_services(&mut state, epoch, services);
            }
            PlatformEvent::CharacteristicsDiscovered {
                epoch,
                service,
                characteristics,
            } => {
                self.on_characteristics(&mut state, epoch, service, characteristics);
            }
            PlatformEvent::NotificationStateChanged {
                epoch,
                characteristic,
                enabled,
            } => {
                if let Some(session) = Self::session_mut(&mut state, epoch) {
                    if session.set_notifying(&characteristic, enabled) {
                        debug!("Notifications on {} now {}", characteristic, enabled);
                    }
                }
            }
            PlatformEvent::ValueUpdated {
                epoch,
                characteristic,
                value,
            } => {
                self.on_value(&mut state, epoch, characteristic, value);
            }
        }
    }

    fn on_adapter_state(&self, state: &mut ManagerState, adapter_state: AdapterState) {
        let old_state = state.adapter_state;
        if old_state == adapter_state {
            return;
        }
        state.adapter_state = adapter_state;
        info!("Adapter state changed: {} -> {}", old_state, adapter_state);
        self.emit(SessionEvent::AdapterStateChanged(adapter_state));

        if !adapter_state.is_ready() {
            // The platform invalidates scans and links when power goes away.
            state.scanning = false;
            state.resume_pending = false;
            self.drop_session(state);
            return;
        }

        if self.config.resume_on_power_on {
            match self.adapter.retrieve_connected(self.config.resume_service) {
                Ok(()) => state.resume_pending = true,
                Err(e) => {
                    warn!("Failed to look up connected peripherals: {}", e);
                    if let Err(e) = self.start_scan_locked(state) {
                        warn!("Failed to start scan: {}", e);
                    }
                }
            }
        }
    }

    fn on_connected_retrieved(&self, state: &mut ManagerState, peripherals: Vec<PeripheralId>) {
        if !std::mem::take(&mut state.resume_pending) {
            trace!("Ignoring unsolicited connected-peripheral list");
            return;
        }
        if !state.adapter_state.is_ready() {
            return;
        }

        match peripherals.last() {
            Some(peripheral) => {
                info!("Resuming with connected peripheral {}", peripheral);
                state.discovered.record(peripheral.clone(), None, None);
                if let Err(e) = self.connect_locked(state, peripheral) {
                    warn!("Failed to resume with {}: {}", peripheral, e);
                }
            }
            None => {
                debug!("No connected peripheral to resume, scanning");
                if let Err(e) = self.start_scan_locked(state) {
                    warn!("Failed to start scan: {}", e);
                }
            }
        }
    }

    fn on_connected(&self, state: &mut ManagerState, epoch: SessionEpoch, peripheral: &PeripheralId) {
        let Some(session) = Self::session_mut(state, epoch) else {
            trace!("Ignoring stale connection of {} ({})", peripheral, epoch);
            return;
        };
        if session.state != ConnectionState::Connecting {
            debug!("Ignoring duplicate connection callback in state {}", session.state);
            return;
        }
        info!("Peripheral {} connected", peripheral);
        self.set_session_state(session, ConnectionState::Connected);

        let request = self.adapter.discover_services(epoch, &session.peripheral_id);
        match request {
            Ok(()) => self.set_session_state(session, ConnectionState::DiscoveringServices),
            Err(e) => {
                warn!("Failed to request service discovery: {}", e);
                self.fail_session(
                    state,
                    SessionFailure::ConnectFailed {
                        peripheral: peripheral.to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn on_services(&self, state: &mut ManagerState, epoch: SessionEpoch, services: Vec<ServiceDescriptor>) {
        let Some(session) = Self::session_mut(state, epoch) else {
            trace!("Ignoring stale service list ({})", epoch);
            return;
        };
        if !session.state.is_connected() {
            debug!("Ignoring service list in state {}", session.state);
            return;
        }

        debug!("Discovered {} services on {}", services.len(), session.peripheral_id);
        session
            .characteristics
            .retain(|c| services.iter().any(|s| s.uuid == c.service_uuid));
        session.services = services;

        if matches!(
            session.state,
            ConnectionState::Connected | ConnectionState::DiscoveringServices
        ) {
            self.set_session_state(session, ConnectionState::DiscoveringCharacteristics);
        }

        for service in &session.services {
            if let Err(e) = self
                .adapter
                .discover_characteristics(epoch, &session.peripheral_id, service.uuid)
            {
                warn!("Failed to request characteristics of {}: {}", service.uuid, e);
            }
        }
    }

    fn on_characteristics(
        &self,
        state: &mut ManagerState,
        epoch: SessionEpoch,
        service: Uuid,
        characteristics: Vec<CharacteristicDescriptor>,
    ) {
        let Some(session) = Self::session_mut(state, epoch) else {
            trace!("Ignoring stale characteristic list ({})", epoch);
            return;
        };
        if !session.state.is_connected() {
            debug!("Ignoring characteristic list in state {}", session.state);
            return;
        }

        debug!("Discovered {} characteristics in service {}", characteristics.len(), service);
        session.replace_characteristics(service, characteristics.clone());

        let mut requested = 0usize;
        for characteristic in &characteristics {
            match self
                .adapter
                .set_notify(epoch, &session.peripheral_id, characteristic, true)
            {
                Ok(()) => {
                    session.set_notifying(&characteristic.uuid, true);
                    requested += 1;
                }
                Err(e) => warn!("Failed to subscribe to {}: {}", characteristic.uuid, e),
            }
        }

        if requested > 0 {
            self.set_session_state(session, ConnectionState::Subscribed);
        }
    }

    fn on_value(
        &self,
        state: &mut ManagerState,
        epoch: SessionEpoch,
        characteristic: Uuid,
        value: std::result::Result<Bytes, String>,
    ) {
        let Some(session) = Self::session_mut(state, epoch) else {
            trace!("Ignoring stale value from {} ({})", characteristic, epoch);
            return;
        };
        if session.state != ConnectionState::Subscribed {
            trace!("Ignoring value from {} in state {}", characteristic, session.state);
            return;
        }

        let value = match value {
            Ok(value) => value,
            Err(reason) => {
                warn!("Error receiving value from {}: {}", characteristic, reason);
                self.fail_session(
                    state,
                    SessionFailure::NotificationFailed {
                        characteristic,
                        reason,
                    },
                );
                return;
            }
        };

        let payload = ReceivedPayload::new(characteristic, value.clone());
        if payload.text.is_none() {
            warn!(
                "Malformed payload from {}: {}",
                characteristic,
                payload_preview(&value)
            );
            self.fail_session(
                state,
                SessionFailure::MalformedPayload {
                    characteristic,
                    len: value.len(),
                },
            );
            return;
        }

        debug!(
            "Received {} bytes from {}: {}",
            value.len(),
            characteristic,
            payload_preview(&value)
        );
        session.last_payload = Some(payload);
        self.emit(SessionEvent::ValueReceived {
            characteristic,
            value,
        });
    }

    // === Internals ===

    fn start_scan_locked(&self, state: &mut ManagerState) -> Result<()> {
        if !state.adapter_state.is_ready() {
            return Err(Error::AdapterNotReady {
                state: state.adapter_state,
            });
        }

        self.teardown_session(state);
        state.discovered.clear();

        info!("Starting BLE scan");
        self.adapter.start_scan()?;
        state.scanning = true;

        Ok(())
    }

    fn stop_scan_locked(&self, state: &mut ManagerState) -> Result<()> {
        if !state.scanning {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");
        state.scanning = false;
        self.adapter.stop_scan()
    }

    fn connect_locked(&self, state: &mut ManagerState, peripheral: &PeripheralId) -> Result<()> {
        let entry = state
            .discovered
            .get(peripheral)
            .ok_or_else(|| Error::UnknownPeripheral {
                identifier: peripheral.to_string(),
            })?;
        if !state.adapter_state.is_ready() {
            return Err(Error::AdapterNotReady {
                state: state.adapter_state,
            });
        }
        if !entry.connectable {
            return Err(Error::SignalTooWeak {
                identifier: peripheral.to_string(),
                rssi: entry.rssi.unwrap_or(i16::MIN),
                min_rssi: state.discovered.min_rssi(),
            });
        }

        if let Some(session) = &state.session {
            if session.peripheral_id == *peripheral {
                debug!("Already in session with {}", peripheral);
                return Ok(());
            }
            info!(
                "Replacing session with {} by {}",
                session.peripheral_id, peripheral
            );
            self.teardown_session(state);
        }

        if let Err(e) = self.stop_scan_locked(state) {
            warn!("Failed to stop scan: {}", e);
        }

        state.epoch = state.epoch.next();
        let epoch = state.epoch;
        info!("Connecting to {} ({})", peripheral, epoch);

        // A rejected request never produced a session.
        if let Err(e) = self.adapter.connect(epoch, peripheral) {
            warn!("Connection request to {} failed: {}", peripheral, e);
            return Err(Error::ConnectFailed {
                reason: e.to_string(),
            });
        }

        let session = ActiveSession::new(peripheral.clone(), epoch);
        self.emit(SessionEvent::SessionStateChanged {
            peripheral: peripheral.clone(),
            state: session.state,
        });
        state.session = Some(session);
        Ok(())
    }

    fn write_locked(&self, target: Option<Uuid>, message: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .session
            .as_mut()
            .filter(|s| s.state == ConnectionState::Subscribed)
            .ok_or(Error::NotConnected)?;

        let characteristic = match target {
            None => session.last_characteristic(),
            Some(uuid) => {
                if session.characteristics.is_empty() {
                    return Err(Error::NoCharacteristic);
                }
                Some(
                    session
                        .characteristic(&uuid)
                        .ok_or(Error::CharacteristicNotFound { uuid })?,
                )
            }
        }
        .cloned()
        .ok_or(Error::NoCharacteristic)?;

        self.adapter.write_value(
            session.epoch,
            &session.peripheral_id,
            &characteristic,
            message,
            WriteType::WithResponse,
        )?;
        debug!(
            "Writing {} bytes to {}: {}",
            message.len(),
            characteristic.uuid,
            payload_preview(message)
        );

        // The write is already queued; a failed mute does not fail the send.
        if self.config.mute_after_send && characteristic.notifying {
            match self.adapter.set_notify(
                session.epoch,
                &session.peripheral_id,
                &characteristic,
                false,
            ) {
                Ok(()) => {
                    session.set_notifying(&characteristic.uuid, false);
                }
                Err(e) => warn!("Failed to mute {} after send: {}", characteristic.uuid, e),
            }
        }

        Ok(())
    }

    /// Disable notifications, release the link and forget the session.
    /// Returns whether there was a session.
    fn teardown_session(&self, state: &mut ManagerState) -> bool {
        let Some(session) = state.session.as_mut() else {
            return false;
        };

        self.set_session_state(session, ConnectionState::Disconnecting);

        for characteristic in session.notifying() {
            if let Err(e) =
                self.adapter
                    .set_notify(session.epoch, &session.peripheral_id, characteristic, false)
            {
                warn!("Failed to unsubscribe from {}: {}", characteristic.uuid, e);
            }
        }

        if let Err(e) = self
            .adapter
            .cancel_connection(session.epoch, &session.peripheral_id)
        {
            warn!("Failed to release {}: {}", session.peripheral_id, e);
        }

        self.drop_session(state);
        true
    }

    /// Forget the session without issuing requests.
    fn drop_session(&self, state: &mut ManagerState) {
        if let Some(mut session) = state.session.take() {
            state.epoch = state.epoch.next();
            self.set_session_state(&mut session, ConnectionState::Disconnected);
        }
    }

    fn fail_session(&self, state: &mut ManagerState, failure: SessionFailure) {
        self.emit(SessionEvent::SessionFailed(failure));
        self.teardown_session(state);
    }

    fn session_mut(state: &mut ManagerState, epoch: SessionEpoch) -> Option<&mut ActiveSession> {
        state.session.as_mut().filter(|s| s.epoch == epoch)
    }

    /// Update the session state and emit an event.
    fn set_session_state(&self, session: &mut ActiveSession, new_state: ConnectionState) {
        let old_state = session.state;
        session.state = new_state;

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);
            self.emit(SessionEvent::SessionStateChanged {
                peripheral: session.peripheral_id.clone(),
                state: new_state,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl<A: CentralAdapter + 'static> SessionManager<A> {
    /// Spawn a task feeding platform callbacks from `events` into
    /// [`handle_event`](Self::handle_event).
    ///
    /// The task ends when the channel closes or the manager is dropped.
    pub fn drive(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PlatformEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.handle_event(event);
            }
            debug!("Platform event pump ended");
        })
    }
}
