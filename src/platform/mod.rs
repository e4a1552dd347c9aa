//! The Bluetooth stack as the session sees it.
//!
//! Event callbacks are modeled as channels: registering a listener hands the
//! platform an [`EventSender`], and whatever the platform observes gets queued
//! for the session's own task instead of touching session state directly.

pub mod btle;
pub mod dummy;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::errors::PlatformError;

/// A peripheral found while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ConnectionStatus(ConnectionStatus),
    ValueChanged(Vec<u8>),
}

pub type EventSender = UnboundedSender<PlatformEvent>;

/// Identifies a registered event listener so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub u64);

/// Operations a [`Session`](crate::heart_rate::session::Session) needs from the Bluetooth stack.
///
/// Implementations are created and used on the session's worker thread only,
/// so neither the platform nor its handles need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait BlePlatform {
    type Device;
    type Service;
    type Characteristic;

    async fn find_devices_advertising_service(
        &mut self,
        service: Uuid,
    ) -> Result<Vec<DeviceDescriptor>, PlatformError>;

    async fn connect(&mut self, device: &DeviceDescriptor) -> Result<Self::Device, PlatformError>;

    async fn on_connection_status_changed(
        &mut self,
        device: &Self::Device,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError>;

    async fn resolve_service(
        &mut self,
        device: &Self::Device,
        service: Uuid,
    ) -> Result<Self::Service, PlatformError>;

    async fn resolve_characteristic(
        &mut self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic, PlatformError>;

    /// Writes the characteristic's client configuration descriptor, `Notify` or `None`
    async fn write_notification_config(
        &mut self,
        characteristic: &Self::Characteristic,
        enable: bool,
    ) -> Result<(), PlatformError>;

    async fn on_value_changed(
        &mut self,
        characteristic: &Self::Characteristic,
        events: EventSender,
    ) -> Result<ListenerToken, PlatformError>;

    fn remove_listener(&mut self, token: ListenerToken) -> Result<(), PlatformError>;

    async fn close(&mut self, device: Self::Device) -> Result<(), PlatformError>;
}
