use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::info;
use uuid::Uuid;

use super::{
    BlePlatform, ConnectionStatus, DeviceDescriptor, EventSender, ListenerToken, PlatformEvent,
};
use crate::errors::PlatformError;
use crate::heart_rate::{HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, HEART_RATE_SERVICE_UUID};
use crate::settings::DummySettings;

const DUMMY_ADDRESS: &str = "00:00:00:00:00:00";

pub struct DummyDevice;
pub struct DummyService;
pub struct DummyCharacteristic;

/// A make-believe Heart Rate Monitor, useful for testing host integrations
/// without a strap on hand.
///
/// BPM sweeps between `low_bpm` and `high_bpm`, and after `loops_before_dc`
/// sweeps the "device" disconnects (never, if 0).
pub struct DummyPlatform {
    dummy_settings: DummySettings,
    status_tx: Option<EventSender>,
    listeners: HashMap<ListenerToken, Option<JoinHandle<()>>>,
    next_token: u64,
}

impl DummyPlatform {
    pub fn new(dummy_settings: DummySettings) -> Self {
        Self {
            dummy_settings,
            status_tx: None,
            listeners: HashMap::new(),
            next_token: 0,
        }
    }

    fn track(&mut self, task: Option<JoinHandle<()>>) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        self.listeners.insert(token, task);
        token
    }
}

impl BlePlatform for DummyPlatform {
    type Device = DummyDevice;
    type Service = DummyService;
    type Characteristic = DummyCharacteristic;

    async fn find_devices_advertising_service(
        &mut self,
        service: Uuid,
    ) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        if service != HEART_RATE_SERVICE_UUID {
            return Ok(Vec::new());
        }
        Ok(vec![DeviceDescriptor {
            id: DUMMY_ADDRESS.to_owned(),
            name: Some("Dummy HRM".to_owned()),
            address: DUMMY_ADDRESS.to_owned(),
        }])
    }

    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<DummyDevice, PlatformError> {
        if device.id != DUMMY_ADDRESS {
            return Err(PlatformError::UnknownDevice(device.id.clone()));
        }
        Ok(DummyDevice)
    }

    async fn on_connection_status_changed(
        &mut self,
        _device: &DummyDevice,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        self.status_tx = Some(events);
        Ok(self.track(None))
    }

    async fn resolve_service(
        &mut self,
        _device: &DummyDevice,
        service: Uuid,
    ) -> Result<DummyService, PlatformError> {
        if service == HEART_RATE_SERVICE_UUID {
            Ok(DummyService)
        } else {
            Err(PlatformError::ServiceNotFound(service))
        }
    }

    async fn resolve_characteristic(
        &mut self,
        _service: &DummyService,
        characteristic: Uuid,
    ) -> Result<DummyCharacteristic, PlatformError> {
        if characteristic == HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID {
            Ok(DummyCharacteristic)
        } else {
            Err(PlatformError::CharacteristicNotFound(characteristic))
        }
    }

    async fn write_notification_config(
        &mut self,
        _characteristic: &DummyCharacteristic,
        _enable: bool,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn on_value_changed(
        &mut self,
        _characteristic: &DummyCharacteristic,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        let status_tx = self.status_tx.clone();
        let dummy_settings = self.dummy_settings.clone();
        let task = tokio::spawn(async move {
            // Guarding against a zero/negative speed in the config
            let bpm_speed = dummy_settings.bpm_speed.max(0.01);
            let mut bpm_update_interval = time::interval(Duration::from_secs_f32(1.0 / bpm_speed));
            let mut sweep = Sweep::new(&dummy_settings);
            loop {
                bpm_update_interval.tick().await;
                match sweep.next() {
                    Some(bpm) => {
                        if events.send(PlatformEvent::ValueChanged(encode_hrm(bpm))).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("Simulating lost connection");
                        if let Some(status_tx) = &status_tx {
                            let _ = status_tx.send(PlatformEvent::ConnectionStatus(
                                ConnectionStatus::Disconnected,
                            ));
                        }
                        break;
                    }
                }
            }
        });
        Ok(self.track(Some(task)))
    }

    fn remove_listener(&mut self, token: ListenerToken) -> Result<(), PlatformError> {
        match self.listeners.remove(&token) {
            Some(Some(task)) => {
                task.abort();
                Ok(())
            }
            Some(None) => {
                self.status_tx = None;
                Ok(())
            }
            None => Err(PlatformError::UnknownListener),
        }
    }

    async fn close(&mut self, _device: DummyDevice) -> Result<(), PlatformError> {
        Ok(())
    }
}

impl Drop for DummyPlatform {
    fn drop(&mut self) {
        for task in self.listeners.drain().filter_map(|(_, task)| task) {
            task.abort();
        }
    }
}

/// Bounces BPM between the configured bounds, one step per call.
struct Sweep {
    bpm: Option<u16>,
    low_bpm: u16,
    high_bpm: u16,
    rising: bool,
    loops: u16,
    loops_before_dc: u16,
}

impl Sweep {
    fn new(dummy_settings: &DummySettings) -> Self {
        let low_bpm = dummy_settings.low_bpm.min(dummy_settings.high_bpm);
        let high_bpm = dummy_settings.high_bpm.max(dummy_settings.low_bpm);
        Self {
            bpm: None,
            low_bpm,
            high_bpm,
            rising: true,
            loops: 0,
            loops_before_dc: dummy_settings.loops_before_dc,
        }
    }

    /// `None` once it's time to simulate a disconnect
    fn next(&mut self) -> Option<u16> {
        let bpm = match self.bpm {
            None => self.low_bpm,
            Some(bpm) if self.rising => bpm.saturating_add(1).min(self.high_bpm),
            Some(bpm) => bpm.saturating_sub(1).max(self.low_bpm),
        };
        self.bpm = Some(bpm);

        let at_bound = if self.rising {
            bpm >= self.high_bpm
        } else {
            bpm <= self.low_bpm
        };
        if at_bound {
            self.rising = !self.rising;
            self.loops = self.loops.saturating_add(1);
        }
        if self.loops_before_dc != 0 && self.loops >= self.loops_before_dc {
            return None;
        }
        Some(bpm)
    }
}

/// Builds a measurement packet, with an RR interval derived from the BPM
fn encode_hrm(bpm: u16) -> Vec<u8> {
    let rr = (60 * 1024 / u32::from(bpm.max(1))) as u16;
    let [rr_lo, rr_hi] = rr.to_le_bytes();
    if bpm > u16::from(u8::MAX) {
        let [lo, hi] = bpm.to_le_bytes();
        vec![0x11, lo, hi, rr_lo, rr_hi]
    } else {
        vec![0x10, bpm as u8, rr_lo, rr_hi]
    }
}
