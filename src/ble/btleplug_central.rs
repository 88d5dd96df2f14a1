//! [`CentralAdapter`] backed by btleplug.
//!
//! Requests are queued to a single worker task and executed in order against
//! the btleplug adapter; results come back as [`PlatformEvent`]s on an
//! unbounded channel. Connection attempts run on their own task so a pending
//! connect can be cancelled.

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{CentralAdapter, PeripheralId, PlatformEvent, SessionEpoch};
use crate::ble::gatt::{CharacteristicDescriptor, ServiceDescriptor};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session_manager::SessionManager;
use crate::utils::payload_preview;

/// Work queued for the request worker.
#[derive(Debug)]
enum Command {
    RefreshAdapterState,
    StartScan,
    StopScan,
    RetrieveConnected(Uuid),
    Disconnect(SessionEpoch, String),
    DiscoverServices(SessionEpoch, String),
    DiscoverCharacteristics(SessionEpoch, String, Uuid),
    SetNotify(SessionEpoch, String, CharacteristicDescriptor, bool),
    Write {
        epoch: SessionEpoch,
        peripheral: String,
        characteristic: CharacteristicDescriptor,
        value: Vec<u8>,
        write_type: WriteType,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::RefreshAdapterState => "refresh adapter state",
            Self::StartScan => "start scan",
            Self::StopScan => "stop scan",
            Self::RetrieveConnected(_) => "retrieve connected",
            Self::Disconnect(..) => "disconnect",
            Self::DiscoverServices(..) => "discover services",
            Self::DiscoverCharacteristics(..) => "discover characteristics",
            Self::SetNotify(..) => "set notify",
            Self::Write { .. } => "write",
        }
    }
}

/// Link bookkeeping per peripheral, each entry tagged with the epoch that
/// created it.
///
/// A request only ever touches entries of its own epoch, so a release queued
/// for an old session cannot tear down a newer link to the same peripheral.
#[derive(Default)]
struct Links {
    /// Pending connect attempts.
    connecting: HashMap<String, (SessionEpoch, JoinHandle<()>)>,
    /// Established links.
    established: HashMap<String, SessionEpoch>,
    /// Notification pumps of established links.
    pumps: HashMap<String, (SessionEpoch, JoinHandle<()>)>,
}

impl Links {
    /// Track a connect attempt, aborting any earlier one to the same peripheral.
    fn start_connect(&mut self, id: &str, epoch: SessionEpoch, handle: JoinHandle<()>) {
        if let Some((previous, handle)) = self.connecting.insert(id.to_string(), (epoch, handle)) {
            trace!("Superseding connect to {} ({})", id, previous);
            handle.abort();
        }
    }

    /// Stop tracking a finished attempt. Returns false if it was superseded.
    fn finish_connect(&mut self, id: &str, epoch: SessionEpoch) -> bool {
        match self.connecting.get(id) {
            Some((pending, _)) if *pending == epoch => {
                self.connecting.remove(id);
                true
            }
            _ => false,
        }
    }

    fn establish(&mut self, id: &str, epoch: SessionEpoch) {
        self.established.insert(id.to_string(), epoch);
    }

    /// Abort the pending attempt of `epoch`, if that is still the pending one.
    fn cancel_connect(&mut self, id: &str, epoch: SessionEpoch) {
        if self.connecting.get(id).map_or(false, |(e, _)| *e == epoch) {
            if let Some((_, handle)) = self.connecting.remove(id) {
                handle.abort();
            }
        }
    }

    /// Drop everything `epoch` holds for the peripheral.
    ///
    /// Returns true if the physical link should be released, which is the
    /// case unless a newer epoch is connecting or linked to it.
    fn release(&mut self, id: &str, epoch: SessionEpoch) -> bool {
        self.cancel_connect(id, epoch);
        if self.pumps.get(id).map_or(false, |(e, _)| *e == epoch) {
            if let Some((_, handle)) = self.pumps.remove(id) {
                handle.abort();
            }
        }
        if self.established.get(id) == Some(&epoch) {
            self.established.remove(id);
        }

        let newer_pending = self.connecting.get(id).map_or(false, |(e, _)| *e != epoch);
        let newer_link = self.established.get(id).map_or(false, |e| *e != epoch);
        !(newer_pending || newer_link)
    }

    /// The platform dropped the link. Returns the epoch that owned it.
    fn lost(&mut self, id: &str) -> Option<SessionEpoch> {
        let epoch = self.established.remove(id)?;
        if let Some((_, handle)) = self.pumps.remove(id) {
            handle.abort();
        }
        Some(epoch)
    }

    /// Check whether `epoch` already has a running pump for the peripheral.
    fn has_pump(&self, id: &str, epoch: SessionEpoch) -> bool {
        self.pumps
            .get(id)
            .map_or(false, |(e, h)| *e == epoch && !h.is_finished())
    }

    fn set_pump(&mut self, id: &str, epoch: SessionEpoch, handle: JoinHandle<()>) {
        if let Some((_, previous)) = self.pumps.insert(id.to_string(), (epoch, handle)) {
            previous.abort();
        }
    }

    fn abort_all(&mut self) {
        for (_, (_, handle)) in self.connecting.drain() {
            handle.abort();
        }
        for (_, (_, handle)) in self.pumps.drain() {
            handle.abort();
        }
        self.established.clear();
    }
}

/// State shared by the worker, the adapter listener and connection tasks.
struct Backend {
    adapter: Adapter,
    events: mpsc::UnboundedSender<PlatformEvent>,
    /// Peripherals seen by the adapter, by identifier string.
    peripherals: RwLock<HashMap<String, Peripheral>>,
    links: Mutex<Links>,
}

impl Backend {
    fn emit(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            trace!("Platform event receiver dropped");
        }
    }

    fn peripheral(&self, id: &str) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownPeripheral {
                identifier: id.to_string(),
            })
    }

    fn remember(&self, peripheral: &Peripheral) -> String {
        let id = peripheral.id().to_string();
        self.peripherals
            .write()
            .entry(id.clone())
            .or_insert_with(|| peripheral.clone());
        id
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = match self.adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        return;
                    }
                };
                let properties = match peripheral.properties().await {
                    Ok(Some(p)) => p,
                    _ => return,
                };
                let key = self.remember(&peripheral);
                self.emit(discovery_event(&key, &properties));
            }
            CentralEvent::DeviceDisconnected(id) => {
                let key = id.to_string();
                let epoch = self.links.lock().lost(&key);
                if let Some(epoch) = epoch {
                    debug!("Device disconnected: {} ({})", key, epoch);
                    self.emit(PlatformEvent::Disconnected {
                        epoch,
                        peripheral: PeripheralId::new(key),
                        reason: None,
                    });
                }
            }
            CentralEvent::StateUpdate(state) => {
                self.emit(PlatformEvent::AdapterStateChanged(state.into()));
            }
            _ => {}
        }
    }

    async fn execute(self: &Arc<Self>, command: Command) -> Result<()> {
        match command {
            Command::RefreshAdapterState => {
                let state = self.adapter.adapter_state().await?;
                self.emit(PlatformEvent::AdapterStateChanged(state.into()));
            }
            Command::StartScan => {
                self.adapter.start_scan(ScanFilter::default()).await?;
            }
            Command::StopScan => {
                self.adapter.stop_scan().await?;
            }
            Command::RetrieveConnected(service) => {
                let mut connected = Vec::new();
                for peripheral in self.adapter.peripherals().await? {
                    if !peripheral.is_connected().await.unwrap_or(false) {
                        continue;
                    }
                    let advertised = match peripheral.properties().await {
                        Ok(Some(p)) => p.services.contains(&service),
                        _ => false,
                    };
                    let resolved = peripheral.services().iter().any(|s| s.uuid == service);
                    if advertised || resolved {
                        connected.push(PeripheralId::new(self.remember(&peripheral)));
                    }
                }
                debug!("{} connected peripherals offer {}", connected.len(), service);
                self.emit(PlatformEvent::ConnectedPeripheralsRetrieved {
                    peripherals: connected,
                });
            }
            Command::Disconnect(epoch, id) => {
                if !self.links.lock().release(&id, epoch) {
                    debug!("{} was relinked after {}, keeping the link", id, epoch);
                    return Ok(());
                }
                let peripheral = self.peripheral(&id)?;
                if peripheral.is_connected().await.unwrap_or(false) {
                    peripheral.disconnect().await?;
                }
                debug!("Released {} ({})", id, epoch);
            }
            Command::DiscoverServices(epoch, id) => {
                let peripheral = self.peripheral(&id)?;
                if let Err(e) = peripheral.discover_services().await {
                    self.emit(PlatformEvent::ConnectFailed {
                        epoch,
                        peripheral: PeripheralId::new(id),
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
                let services = peripheral
                    .services()
                    .iter()
                    .map(ServiceDescriptor::from)
                    .collect();
                self.emit(PlatformEvent::ServicesDiscovered { epoch, services });
            }
            Command::DiscoverCharacteristics(epoch, id, service) => {
                let peripheral = self.peripheral(&id)?;
                // btleplug resolves characteristics together with services.
                let characteristics = peripheral
                    .services()
                    .iter()
                    .find(|s| s.uuid == service)
                    .map(|s| {
                        s.characteristics
                            .iter()
                            .map(CharacteristicDescriptor::from)
                            .collect()
                    })
                    .unwrap_or_default();
                self.emit(PlatformEvent::CharacteristicsDiscovered {
                    epoch,
                    service,
                    characteristics,
                });
            }
            Command::SetNotify(epoch, id, descriptor, enabled) => {
                let peripheral = self.peripheral(&id)?;
                let characteristic = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|c| descriptor.matches(c))
                    .ok_or(Error::CharacteristicNotFound {
                        uuid: descriptor.uuid,
                    })?;

                let result = if enabled {
                    peripheral.subscribe(&characteristic).await
                } else {
                    peripheral.unsubscribe(&characteristic).await
                };
                let enabled = match result {
                    Ok(()) => enabled,
                    Err(e) => {
                        warn!("Failed to set notify on {}: {}", descriptor.uuid, e);
                        false
                    }
                };
                if enabled {
                    self.ensure_pump(epoch, &id, &peripheral);
                }
                self.emit(PlatformEvent::NotificationStateChanged {
                    epoch,
                    characteristic: descriptor.uuid,
                    enabled,
                });
            }
            Command::Write {
                epoch,
                peripheral: id,
                characteristic: descriptor,
                value,
                write_type,
            } => {
                let peripheral = self.peripheral(&id)?;
                let characteristic = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|c| descriptor.matches(c))
                    .ok_or(Error::CharacteristicNotFound {
                        uuid: descriptor.uuid,
                    })?;
                peripheral.write(&characteristic, &value, write_type).await?;
                trace!(
                    "Wrote {} to {} ({})",
                    payload_preview(&value),
                    descriptor.uuid,
                    epoch
                );
            }
        }
        Ok(())
    }

    /// Start forwarding notifications of a linked peripheral, once per link.
    fn ensure_pump(self: &Arc<Self>, epoch: SessionEpoch, id: &str, peripheral: &Peripheral) {
        let mut links = self.links.lock();
        if links.has_pump(id, epoch) {
            return;
        }

        let backend = Arc::clone(self);
        let peripheral = peripheral.clone();
        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {}",
                    notification.uuid,
                    payload_preview(&notification.value)
                );
                backend.emit(PlatformEvent::ValueUpdated {
                    epoch,
                    characteristic: notification.uuid,
                    value: Ok(Bytes::from(notification.value)),
                });
            }

            debug!("Notification stream ended");
        });
        links.set_pump(id, epoch, handle);
    }
}

/// Build the discovery callback for a sighted peripheral.
fn discovery_event(id: &str, properties: &PeripheralProperties) -> PlatformEvent {
    PlatformEvent::PeripheralDiscovered {
        peripheral: PeripheralId::new(id),
        name: properties.local_name.clone(),
        rssi: properties.rssi,
    }
}

/// btleplug implementation of [`CentralAdapter`].
pub struct BtleplugCentral {
    backend: Arc<Backend>,
    commands: mpsc::UnboundedSender<Command>,
    runtime: Handle,
    listener: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl BtleplugCentral {
    /// Open the first Bluetooth adapter.
    ///
    /// Returns the backend and the receiver of its platform callbacks. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no adapter is present.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<PlatformEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Wrap a specific btleplug adapter.
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlatformEvent>)> {
        let mut central_events = adapter.events().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let backend = Arc::new(Backend {
            adapter,
            events: events_tx,
            peripherals: RwLock::new(HashMap::new()),
            links: Mutex::new(Links::default()),
        });

        let listener = {
            let backend = backend.clone();
            tokio::spawn(async move {
                while let Some(event) = central_events.next().await {
                    backend.handle_central_event(event).await;
                }
                debug!("Adapter event stream ended");
            })
        };

        let (commands, mut command_rx) = mpsc::unbounded_channel::<Command>();
        let worker = {
            let backend = backend.clone();
            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    let name = command.name();
                    if let Err(e) = backend.execute(command).await {
                        warn!("Request '{}' failed: {}", name, e);
                    }
                }
                debug!("Request worker ended");
            })
        };

        Ok((
            Self {
                backend,
                commands,
                runtime: Handle::current(),
                listener,
                worker,
            },
            events_rx,
        ))
    }

    /// The underlying btleplug adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.backend.adapter
    }

    fn queue(&self, command: Command) -> Result<()> {
        trace!("Queueing {}", command.name());
        self.commands
            .send(command)
            .map_err(|_| Error::Internal("request worker stopped".to_string()))
    }
}

impl CentralAdapter for BtleplugCentral {
    fn refresh_adapter_state(&self) -> Result<()> {
        self.queue(Command::RefreshAdapterState)
    }

    fn start_scan(&self) -> Result<()> {
        self.queue(Command::StartScan)
    }

    fn stop_scan(&self) -> Result<()> {
        self.queue(Command::StopScan)
    }

    fn retrieve_connected(&self, service: Uuid) -> Result<()> {
        self.queue(Command::RetrieveConnected(service))
    }

    fn connect(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        let id = peripheral.as_str().to_string();
        let target = self.backend.peripheral(&id)?;
        let backend = self.backend.clone();

        // Held across the spawn so the task cannot finish before it is tracked.
        let mut links = self.backend.links.lock();
        let task_id = id.clone();
        let handle = self.runtime.spawn(async move {
            let result = match target.connect().await {
                Ok(()) => target.is_connected().await,
                Err(e) => Err(e),
            };
            {
                let mut links = backend.links.lock();
                if links.finish_connect(&task_id, epoch) && matches!(result, Ok(true)) {
                    links.establish(&task_id, epoch);
                }
            }

            match result {
                Ok(true) => {
                    backend.emit(PlatformEvent::Connected {
                        epoch,
                        peripheral: PeripheralId::new(task_id),
                    });
                }
                Ok(false) => backend.emit(PlatformEvent::ConnectFailed {
                    epoch,
                    peripheral: PeripheralId::new(task_id),
                    reason: "link not established".to_string(),
                }),
                Err(e) => backend.emit(PlatformEvent::ConnectFailed {
                    epoch,
                    peripheral: PeripheralId::new(task_id),
                    reason: e.to_string(),
                }),
            }
        });

        links.start_connect(&id, epoch, handle);
        Ok(())
    }

    fn cancel_connection(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        let id = peripheral.as_str().to_string();
        // Abort a pending attempt now; the release itself is ordered after
        // earlier requests.
        self.backend.links.lock().cancel_connect(&id, epoch);
        self.queue(Command::Disconnect(epoch, id))
    }

    fn discover_services(&self, epoch: SessionEpoch, peripheral: &PeripheralId) -> Result<()> {
        self.queue(Command::DiscoverServices(
            epoch,
            peripheral.as_str().to_string(),
        ))
    }

    fn discover_characteristics(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<()> {
        self.queue(Command::DiscoverCharacteristics(
            epoch,
            peripheral.as_str().to_string(),
            service,
        ))
    }

    fn set_notify(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        enabled: bool,
    ) -> Result<()> {
        self.queue(Command::SetNotify(
            epoch,
            peripheral.as_str().to_string(),
            characteristic.clone(),
            enabled,
        ))
    }

    fn write_value(
        &self,
        epoch: SessionEpoch,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.queue(Command::Write {
            epoch,
            peripheral: peripheral.as_str().to_string(),
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            write_type,
        })
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        self.listener.abort();
        self.worker.abort();
        self.backend.links.lock().abort_all();
    }
}

impl SessionManager<BtleplugCentral> {
    /// Create a manager on the first Bluetooth adapter and start feeding it
    /// platform callbacks.
    ///
    /// Returns the manager and the handle of the callback pump task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no adapter is present.
    pub async fn with_btleplug(config: SessionConfig) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let (central, events) = BtleplugCentral::new().await?;
        let manager = Arc::new(SessionManager::new(central, config));
        let pump = manager.drive(events);

        // btleplug reports only changes; ask once for the current state.
        manager.adapter().refresh_adapter_state()?;

        Ok((manager, pump))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_event_from_properties() {
        let properties = PeripheralProperties {
            local_name: Some("raspberrypi".to_string()),
            rssi: Some(-48),
            ..Default::default()
        };

        match discovery_event("hci0/dev_B8_27_EB_00_00_01", &properties) {
            PlatformEvent::PeripheralDiscovered {
                peripheral,
                name,
                rssi,
            } => {
                assert_eq!(peripheral.as_str(), "hci0/dev_B8_27_EB_00_00_01");
                assert_eq!(name.as_deref(), Some("raspberrypi"));
                assert_eq!(rssi, Some(-48));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_discovery_event_without_advertised_name() {
        let properties = PeripheralProperties::default();
        assert!(matches!(
            discovery_event("p", &properties),
            PlatformEvent::PeripheralDiscovered {
                name: None,
                rssi: None,
                ..
            }
        ));
    }

    fn idle_task() -> JoinHandle<()> {
        tokio::spawn(std::future::pending::<()>())
    }

    #[tokio::test]
    async fn test_release_of_old_session_keeps_newer_connect() {
        let old = SessionEpoch::default().next();
        let new = old.next();
        let mut links = Links::default();
        links.start_connect("p", old, idle_task());
        links.finish_connect("p", old);
        links.establish("p", old);

        // Reconnect before the old release reaches the worker.
        links.start_connect("p", new, idle_task());
        assert!(!links.release("p", old));

        assert!(links.connecting.get("p").map_or(false, |(e, _)| *e == new));
        assert!(links.established.get("p").is_none());
        assert!(links.finish_connect("p", new));
    }

    #[tokio::test]
    async fn test_release_of_old_session_keeps_newer_link() {
        let old = SessionEpoch::default().next();
        let new = old.next();
        let mut links = Links::default();
        links.start_connect("p", new, idle_task());
        assert!(links.finish_connect("p", new));
        links.establish("p", new);
        links.set_pump("p", new, idle_task());

        assert!(!links.release("p", old));
        assert_eq!(links.established.get("p"), Some(&new));
        assert!(links.has_pump("p", new));
        assert_eq!(links.lost("p"), Some(new));
        assert!(!links.has_pump("p", new));
    }

    #[tokio::test]
    async fn test_release_of_current_session() {
        let epoch = SessionEpoch::default().next();
        let mut links = Links::default();
        links.start_connect("p", epoch, idle_task());
        assert!(links.finish_connect("p", epoch));
        links.establish("p", epoch);
        links.set_pump("p", epoch, idle_task());

        assert!(links.release("p", epoch));
        assert!(links.established.is_empty());
        assert!(links.pumps.is_empty());
        assert_eq!(links.lost("p"), None);
    }

    #[tokio::test]
    async fn test_superseded_connect_is_not_finished() {
        let old = SessionEpoch::default().next();
        let new = old.next();
        let mut links = Links::default();
        links.start_connect("p", old, idle_task());
        links.start_connect("p", new, idle_task());

        assert!(!links.finish_connect("p", old));
        // Cancelling the stale attempt leaves the current one alone.
        links.cancel_connect("p", old);
        assert!(links.connecting.contains_key("p"));
        links.cancel_connect("p", new);
        assert!(links.connecting.is_empty());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::StartScan.name(), "start scan");
        assert_eq!(
            Command::Disconnect(SessionEpoch::default(), "p".to_string()).name(),
            "disconnect"
        );
    }
}
