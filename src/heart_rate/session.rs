use std::future::Future;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::measurement::parse_hrm;
use super::{
    SessionState, StatusCode, HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::callbacks::Reporter;
use crate::errors::{PlatformError, SessionError};
use crate::platform::{
    BlePlatform, ConnectionStatus, DeviceDescriptor, EventSender, ListenerToken, PlatformEvent,
};
use crate::settings::BLESettings;

/// Everything a session has acquired from the platform so far.
///
/// Kept apart from [`Session`] so teardown can release exactly what was
/// acquired, no matter which step failed.
struct Handles<P: BlePlatform> {
    device: Option<P::Device>,
    characteristic: Option<P::Characteristic>,
    connection_listener: Option<ListenerToken>,
    value_listener: Option<ListenerToken>,
}

impl<P: BlePlatform> Handles<P> {
    fn new() -> Self {
        Self {
            device: None,
            characteristic: None,
            connection_listener: None,
            value_listener: None,
        }
    }
}

/// One monitoring run against one Heart Rate peripheral.
pub struct Session<P: BlePlatform> {
    platform: P,
    reporter: Reporter,
    ble_settings: BLESettings,
    cancel_token: CancellationToken,
    state: SessionState,
    events_tx: EventSender,
    events_rx: UnboundedReceiver<PlatformEvent>,
}

impl<P: BlePlatform> Session<P> {
    pub fn new(
        platform: P,
        reporter: Reporter,
        ble_settings: BLESettings,
        cancel_token: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            platform,
            reporter,
            ble_settings,
            cancel_token,
            state: SessionState::Idle,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session from Idle to Stopped.
    ///
    /// Returns once the cancel token is triggered (by the controller or by a
    /// device disconnect) or setup fails, always after cleanup has run.
    pub async fn run(&mut self) {
        let mut handles = Handles::new();
        match self.establish(&mut handles).await {
            Ok(()) => {
                self.monitor().await;
                self.transition(SessionState::Stopping, StatusCode::Stopping, "Stopping...");
            }
            Err(SessionError::Cancelled) => {
                info!("Stop requested during setup ({:?})", self.state);
                self.transition(SessionState::Stopping, StatusCode::Stopping, "Stopping...");
            }
            Err(e) => {
                error!("Session failed while {:?}: {e}", self.state);
                self.state = SessionState::Failed;
                self.reporter.status(StatusCode::RuntimeError, &e.to_string());
            }
        }
        self.teardown(handles).await;
    }

    fn transition(&mut self, state: SessionState, status: StatusCode, message: &str) {
        debug!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
        self.reporter.status(status, message);
    }

    async fn establish(&mut self, handles: &mut Handles<P>) -> Result<(), SessionError> {
        let cancel_token = self.cancel_token.clone();

        self.transition(SessionState::Scanning, StatusCode::Scanning, "Starting Scan...");
        let devices = until_cancelled(
            &cancel_token,
            self.platform
                .find_devices_advertising_service(HEART_RATE_SERVICE_UUID),
        )
        .await?
        .map_err(SessionError::Discovery)?;
        debug!("Found {} candidate device(s)", devices.len());
        let descriptor = pick_device(devices, &self.ble_settings).ok_or(SessionError::NoDevice)?;

        self.transition(SessionState::Connecting, StatusCode::Connecting, "Connecting...");
        info!(
            "Connecting to Heart Rate Monitor! Name: {:?} | Address: {:?}",
            descriptor.name, descriptor.address
        );
        // Runs to completion so a link that came up always gets closed
        let device = self
            .platform
            .connect(&descriptor)
            .await
            .map_err(SessionError::Connect)?;
        let device = &*handles.device.insert(device);
        if cancel_token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        handles.connection_listener = Some(
            self.platform
                .on_connection_status_changed(device, self.events_tx.clone())
                .await
                .map_err(SessionError::Connect)?,
        );

        self.transition(
            SessionState::ResolvingServices,
            StatusCode::Discovering,
            "Discovering Services...",
        );
        let service = until_cancelled(
            &cancel_token,
            self.platform.resolve_service(device, HEART_RATE_SERVICE_UUID),
        )
        .await?
        .map_err(SessionError::Service)?;
        let characteristic = until_cancelled(
            &cancel_token,
            self.platform
                .resolve_characteristic(&service, HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID),
        )
        .await?
        .map_err(SessionError::Characteristic)?;
        drop(service);

        self.transition(SessionState::Subscribing, StatusCode::Subscribing, "Subscribing...");
        let characteristic = &*handles.characteristic.insert(characteristic);
        until_cancelled(
            &cancel_token,
            self.platform.write_notification_config(characteristic, true),
        )
        .await?
        .map_err(SessionError::Subscribe)?;
        handles.value_listener = Some(
            self.platform
                .on_value_changed(characteristic, self.events_tx.clone())
                .await
                .map_err(SessionError::Subscribe)?,
        );

        self.transition(
            SessionState::Monitoring,
            StatusCode::Streaming,
            "Connected and Monitoring",
        );
        Ok(())
    }

    async fn monitor(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("Shutting down HR Notification loop!");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }
    }

    fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ValueChanged(payload) => match parse_hrm(&payload) {
                Ok(measurement) => {
                    trace!("HR packet: {payload:02x?}");
                    if measurement.sensor_contact == Some(false) {
                        debug!("Sensor reports no skin contact");
                    }
                    if !measurement.rr_intervals.is_empty() {
                        debug!("RR intervals: {:?}", measurement.rr_intervals);
                    }
                    self.reporter.heart_rate(measurement.bpm);
                }
                // One bad packet isn't worth dropping the connection over
                Err(e) => warn!("Dropping malformed HR packet {payload:02x?}: {e}"),
            },
            PlatformEvent::ConnectionStatus(ConnectionStatus::Disconnected) => {
                warn!("Heart Rate Monitor disconnected!");
                self.reporter
                    .status(StatusCode::Disconnected, "Device Disconnected");
                self.cancel_token.cancel();
            }
            PlatformEvent::ConnectionStatus(ConnectionStatus::Connected) => {
                debug!("Heart Rate Monitor reports connected");
            }
        }
    }

    /// Releases whatever was acquired, listeners before the handles they reference
    /// and the characteristic before the device. Failures are reported, never fatal.
    async fn teardown(&mut self, handles: Handles<P>) {
        let Handles {
            device,
            characteristic,
            connection_listener,
            value_listener,
        } = handles;

        if let Some(token) = value_listener {
            if let Err(e) = self.platform.remove_listener(token) {
                self.cleanup_error(e);
            }
        }
        if let Some(characteristic) = characteristic {
            if let Err(e) = self
                .platform
                .write_notification_config(&characteristic, false)
                .await
            {
                self.cleanup_error(e);
            }
        }
        if let Some(token) = connection_listener {
            if let Err(e) = self.platform.remove_listener(token) {
                self.cleanup_error(e);
            }
        }
        if let Some(device) = device {
            if let Err(e) = self.platform.close(device).await {
                self.cleanup_error(e);
            }
        }

        self.transition(SessionState::Stopped, StatusCode::Stopped, "Stopped");
    }

    fn cleanup_error(&self, e: PlatformError) {
        error!("Cleanup error: {e}");
        self.reporter
            .status(StatusCode::CleanupError, &format!("Cleanup Error: {e}"));
    }
}

/// Picks the first device matching the saved name/address.
/// Empty filters match anything.
pub fn pick_device(
    devices: Vec<DeviceDescriptor>,
    ble_settings: &BLESettings,
) -> Option<DeviceDescriptor> {
    let saved_name = ble_settings.saved_name.trim();
    let saved_address = ble_settings.saved_address.trim();
    devices.into_iter().find(|device| {
        (saved_address.is_empty() || device.address.eq_ignore_ascii_case(saved_address))
            && (saved_name.is_empty() || device.name.as_deref() == Some(saved_name))
    })
}

async fn until_cancelled<T>(
    cancel_token: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, SessionError> {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => Err(SessionError::Cancelled),
        output = future => Ok(output),
    }
}
