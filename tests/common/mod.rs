#![allow(dead_code)]

use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use pulse_tether::controller::MonitorController;
use pulse_tether::errors::PlatformError;
use pulse_tether::heart_rate::{
    StatusCode, HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, HEART_RATE_SERVICE_UUID,
};
use pulse_tether::platform::{
    BlePlatform, ConnectionStatus, DeviceDescriptor, EventSender, ListenerToken, PlatformEvent,
};
use pulse_tether::settings::BLESettings;
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(3);
const SLOW_CONNECT: Duration = Duration::from_millis(200);

/// Everything the session asked the platform to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find,
    Connect(String),
    WatchConnection,
    ResolveService,
    ResolveCharacteristic,
    Subscribe,
    Unsubscribe,
    WatchValue,
    RemoveListener(u64),
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub devices: Vec<DeviceDescriptor>,
    pub fail_connect: bool,
    pub missing_service: bool,
    pub missing_characteristic: bool,
    pub fail_subscribe: bool,
    pub fail_unsubscribe: bool,
    pub fail_close: bool,
    /// Scanning never finishes on its own
    pub hang_scan: bool,
    /// Connecting succeeds, but only after a while
    pub slow_connect: bool,
    pub hang_resolve: bool,
    /// Enabling notifications never finishes, disabling still does
    pub hang_subscribe: bool,
    /// The device drops while its services are being resolved
    pub disconnect_during_resolve: bool,
}

impl Script {
    pub fn happy() -> Self {
        Self {
            devices: vec![strap("Strap", "AA:BB:CC:DD:EE:01")],
            ..Default::default()
        }
    }
}

pub fn strap(name: &str, address: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: address.to_owned(),
        name: Some(name.to_owned()),
        address: address.to_owned(),
    }
}

#[derive(Default)]
struct Shared {
    script: Script,
    calls: Vec<Call>,
    value_tx: Option<EventSender>,
    status_tx: Option<EventSender>,
    platforms_built: usize,
}

/// Test-side view of the scripted platform, shared with every platform it builds.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptHandle {
    pub fn new(script: Script) -> Self {
        let handle = Self::default();
        handle.lock().script = script;
        handle
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    pub fn platform(&self) -> ScriptedPlatform {
        self.lock().platforms_built += 1;
        ScriptedPlatform {
            shared: Arc::clone(&self.shared),
            next_token: 0,
        }
    }

    pub fn controller(&self) -> MonitorController<ScriptedPlatform> {
        let handle = self.clone();
        MonitorController::new(BLESettings::default(), move |_: &BLESettings| {
            handle.platform()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn platforms_built(&self) -> usize {
        self.lock().platforms_built
    }

    pub fn was_called(&self, call: &Call) -> bool {
        self.lock().calls.contains(call)
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().value_tx.is_some()
    }

    pub fn notify(&self, payload: &[u8]) {
        let shared = self.lock();
        let value_tx = shared.value_tx.as_ref().expect("no value listener registered");
        value_tx
            .send(PlatformEvent::ValueChanged(payload.to_vec()))
            .expect("session stopped listening");
    }

    pub fn disconnect(&self) {
        let shared = self.lock();
        let status_tx = shared
            .status_tx
            .as_ref()
            .expect("no connection listener registered");
        status_tx
            .send(PlatformEvent::ConnectionStatus(
                ConnectionStatus::Disconnected,
            ))
            .expect("session stopped listening");
    }
}

pub struct ScriptedPlatform {
    shared: Arc<Mutex<Shared>>,
    next_token: u64,
}

impl ScriptedPlatform {
    fn record(&self, call: Call) -> Script {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(call);
        shared.script.clone()
    }

    fn token(&mut self) -> ListenerToken {
        self.next_token += 1;
        ListenerToken(self.next_token)
    }
}

// Value listener tokens are offset so removal can tell the two kinds apart
const VALUE_TOKEN_BASE: u64 = 1000;

impl BlePlatform for ScriptedPlatform {
    type Device = String;
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn find_devices_advertising_service(
        &mut self,
        service: Uuid,
    ) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        let script = self.record(Call::Find);
        assert_eq!(service, HEART_RATE_SERVICE_UUID);
        if script.hang_scan {
            std::future::pending::<()>().await;
        }
        Ok(script.devices)
    }

    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<String, PlatformError> {
        let script = self.record(Call::Connect(device.address.clone()));
        if script.fail_connect {
            return Err(PlatformError::Communication("unreachable".into()));
        }
        if script.slow_connect {
            tokio::time::sleep(SLOW_CONNECT).await;
        }
        Ok(device.id.clone())
    }

    async fn on_connection_status_changed(
        &mut self,
        _device: &String,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        self.record(Call::WatchConnection);
        self.shared.lock().unwrap().status_tx = Some(events);
        Ok(self.token())
    }

    async fn resolve_service(
        &mut self,
        _device: &String,
        service: Uuid,
    ) -> Result<Uuid, PlatformError> {
        let script = self.record(Call::ResolveService);
        if script.disconnect_during_resolve {
            let shared = self.shared.lock().unwrap();
            if let Some(status_tx) = &shared.status_tx {
                let _ = status_tx.send(PlatformEvent::ConnectionStatus(
                    ConnectionStatus::Disconnected,
                ));
            }
        }
        if script.hang_resolve {
            std::future::pending::<()>().await;
        }
        if script.missing_service {
            return Err(PlatformError::ServiceNotFound(service));
        }
        Ok(service)
    }

    async fn resolve_characteristic(
        &mut self,
        _service: &Uuid,
        characteristic: Uuid,
    ) -> Result<Uuid, PlatformError> {
        let script = self.record(Call::ResolveCharacteristic);
        assert_eq!(characteristic, HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID);
        if script.missing_characteristic {
            return Err(PlatformError::CharacteristicNotFound(characteristic));
        }
        Ok(characteristic)
    }

    async fn write_notification_config(
        &mut self,
        _characteristic: &Uuid,
        enable: bool,
    ) -> Result<(), PlatformError> {
        if enable {
            let script = self.record(Call::Subscribe);
            if script.hang_subscribe {
                std::future::pending::<()>().await;
            }
            if script.fail_subscribe {
                return Err(PlatformError::Communication("not acknowledged".into()));
            }
        } else {
            let script = self.record(Call::Unsubscribe);
            if script.fail_unsubscribe {
                return Err(PlatformError::Communication("write failed".into()));
            }
        }
        Ok(())
    }

    async fn on_value_changed(
        &mut self,
        _characteristic: &Uuid,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError> {
        self.record(Call::WatchValue);
        self.shared.lock().unwrap().value_tx = Some(events);
        Ok(ListenerToken(VALUE_TOKEN_BASE + self.token().0))
    }

    fn remove_listener(&mut self, token: ListenerToken) -> Result<(), PlatformError> {
        self.record(Call::RemoveListener(token.0));
        let mut shared = self.shared.lock().unwrap();
        if token.0 >= VALUE_TOKEN_BASE {
            shared.value_tx = None;
        } else {
            shared.status_tx = None;
        }
        Ok(())
    }

    async fn close(&mut self, _device: String) -> Result<(), PlatformError> {
        let script = self.record(Call::Close);
        if script.fail_close {
            return Err(PlatformError::Communication("close failed".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reported {
    Status(StatusCode),
    HeartRate(u16),
}

/// Collects everything a controller reports through its callbacks
pub struct Recorder {
    rx: mpsc::Receiver<Reported>,
}

impl Recorder {
    pub fn attach<P: BlePlatform + 'static>(controller: &MonitorController<P>) -> Self {
        let (tx, rx) = mpsc::channel();
        let status_tx = tx.clone();
        controller.register_status_callback(Some(Box::new(move |status, _message| {
            let _ = status_tx.send(Reported::Status(status));
        })));
        controller.register_heart_rate_callback(Some(Box::new(move |bpm| {
            let _ = tx.send(Reported::HeartRate(bpm));
        })));
        Self { rx }
    }

    /// Everything reported up to and including `status`
    pub fn until_status(&self, status: StatusCode) -> Vec<Reported> {
        let mut seen = Vec::new();
        loop {
            let reported = self
                .rx
                .recv_timeout(WAIT)
                .unwrap_or_else(|_| panic!("timed out waiting for {status:?}, saw {seen:?}"));
            seen.push(reported);
            if reported == Reported::Status(status) {
                return seen;
            }
        }
    }

    pub fn drain(&self) -> Vec<Reported> {
        self.rx.try_iter().collect()
    }
}

pub fn statuses(reported: &[Reported]) -> Vec<StatusCode> {
    reported
        .iter()
        .filter_map(|r| match r {
            Reported::Status(status) => Some(*status),
            Reported::HeartRate(_) => None,
        })
        .collect()
}

pub fn heart_rates(reported: &[Reported]) -> Vec<u16> {
    reported
        .iter()
        .filter_map(|r| match r {
            Reported::HeartRate(bpm) => Some(*bpm),
            Reported::Status(_) => None,
        })
        .collect()
}

/// Polls until `condition` holds, panicking after [`WAIT`]
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition never became true"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
