use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BlePlatform, ConnectionStatus, DeviceDescriptor, EventSender, ListenerToken, PlatformEvent,
};
use crate::errors::PlatformError;

pub struct BtleDevice {
    peripheral: Peripheral,
}

pub struct BtleService {
    peripheral: Peripheral,
    service: Service,
}

pub struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// [`BlePlatform`] backed by the system Bluetooth adapter through `btleplug`.
///
/// Needs to live inside a Tokio runtime, listeners are spawned as tasks.
pub struct BtleplugPlatform {
    scan_duration: Duration,
    central: Option<Adapter>,
    discovered: HashMap<String, Peripheral>,
    listeners: HashMap<ListenerToken, JoinHandle<()>>,
    next_token: u64,
}

impl BtleplugPlatform {
    pub fn new(scan_duration: Duration) -> Self {
        Self {
            scan_duration,
            central: None,
            discovered: HashMap::new(),
            listeners: HashMap::new(),
            next_token: 0,
        }
    }

    async fn central(&mut self) -> Result<Adapter, PlatformError> {
        if let Some(central) = &self.central {
            return Ok(central.clone());
        }
        let manager = Manager::new().await?;
        let central = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(PlatformError::NoAdapter)?;
        self.central = Some(central.clone());
        Ok(central)
    }

    fn track(&mut self, task: JoinHandle<()>) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        self.listeners.insert(token, task);
        token
    }
}

impl BlePlatform for BtleplugPlatform {
    type Device = BtleDevice;
    type Service = BtleService;
    type Characteristic = BtleCharacteristic;

    async fn find_devices_advertising_service(
        &mut self,
        service: Uuid,
    ) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        let central = self.central().await?;
        let mut events = central.events().await?;
        central
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        // Stop waiting once something advertising the service shows up, the rest is collected below.
        // Services can arrive in a later update than the discovery itself.
        let wait_for_first = async {
            while let Some(event) = events.next().await {
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
                else {
                    continue;
                };
                let Ok(peripheral) = central.peripheral(&id).await else {
                    continue;
                };
                match peripheral.properties().await {
                    Ok(properties) if advertises(properties.as_ref(), service) => {
                        debug!("Discovered {id:?}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Couldn't read properties of {id:?}: {e}"),
                }
            }
        };
        if tokio::time::timeout(self.scan_duration, wait_for_first)
            .await
            .is_err()
        {
            debug!("Scan window of {:?} elapsed", self.scan_duration);
        }
        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }

        let mut found = Vec::new();
        for peripheral in central.peripherals().await? {
            let properties = peripheral.properties().await?;
            // Not every backend honors the scan filter
            let Some(properties) = properties.filter(|p| advertises(Some(p), service)) else {
                continue;
            };
            let descriptor = DeviceDescriptor {
                id: peripheral.id().to_string(),
                name: properties.local_name,
                address: properties.address.to_string(),
            };
            info!(
                "Found Heart Rate Monitor! Name: {:?} | Address: {:?}",
                descriptor.name, descriptor.address
            );
            self.discovered.insert(descriptor.id.clone(), peripheral);
            found.push(descriptor);
        }
        Ok(found)
    }

    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<BtleDevice, PlatformError> {
        let peripheral = self
            .discovered
            .get(&device.id)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownDevice(device.id.clone()))?;
        peripheral.connect().await?;
        Ok(BtleDevice { peripheral })
    }

    async fn on_connection_status_changed(
        &mut self,
        device: &BtleDevice,
        events_tx: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        let central = self.central().await?;
        let mut events = central.events().await?;
        let id = device.peripheral.id();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let status = match event {
                    CentralEvent::DeviceDisconnected(peripheral) if peripheral == id => {
                        ConnectionStatus::Disconnected
                    }
                    CentralEvent::DeviceConnected(peripheral) if peripheral == id => {
                        ConnectionStatus::Connected
                    }
                    _ => continue,
                };
                if events_tx
                    .send(PlatformEvent::ConnectionStatus(status))
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(self.track(task))
    }

    async fn resolve_service(
        &mut self,
        device: &BtleDevice,
        service: Uuid,
    ) -> Result<BtleService, PlatformError> {
        device.peripheral.discover_services().await?;
        let found = device
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or(PlatformError::ServiceNotFound(service))?;
        debug!(
            "Found {} characteristics in service {service}",
            found.characteristics.len()
        );
        Ok(BtleService {
            peripheral: device.peripheral.clone(),
            service: found,
        })
    }

    async fn resolve_characteristic(
        &mut self,
        service: &BtleService,
        characteristic: Uuid,
    ) -> Result<BtleCharacteristic, PlatformError> {
        let found = service
            .service
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or(PlatformError::CharacteristicNotFound(characteristic))?;
        Ok(BtleCharacteristic {
            peripheral: service.peripheral.clone(),
            characteristic: found,
        })
    }

    async fn write_notification_config(
        &mut self,
        characteristic: &BtleCharacteristic,
        enable: bool,
    ) -> Result<(), PlatformError> {
        let peripheral = &characteristic.peripheral;
        if enable {
            peripheral.subscribe(&characteristic.characteristic).await?;
        } else {
            peripheral.unsubscribe(&characteristic.characteristic).await?;
        }
        Ok(())
    }

    async fn on_value_changed(
        &mut self,
        characteristic: &BtleCharacteristic,
        events_tx: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        let mut notifications = characteristic.peripheral.notifications().await?;
        let uuid = characteristic.characteristic.uuid;
        let task = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid != uuid {
                    continue;
                }
                if events_tx
                    .send(PlatformEvent::ValueChanged(data.value))
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(self.track(task))
    }

    fn remove_listener(&mut self, token: ListenerToken) -> Result<(), PlatformError> {
        let task = self
            .listeners
            .remove(&token)
            .ok_or(PlatformError::UnknownListener)?;
        task.abort();
        Ok(())
    }

    async fn close(&mut self, device: BtleDevice) -> Result<(), PlatformError> {
        self.discovered.retain(|_, p| p.id() != device.peripheral.id());
        let connected = device.peripheral.is_connected().await;
        if let Err(e) = &connected {
            warn!("Couldn't query connection state, disconnecting anyway: {e}");
        }
        if needs_disconnect(&connected) {
            device.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Only a confirmed "not connected" skips the disconnect
fn needs_disconnect(connected: &btleplug::Result<bool>) -> bool {
    !matches!(connected, Ok(false))
}

fn advertises(properties: Option<&PeripheralProperties>, service: Uuid) -> bool {
    properties.is_some_and(|properties| properties.services.contains(&service))
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        for (_, task) in self.listeners.drain() {
            task.abort();
        }
    }
}
