use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while setting up the CLI or the plugin's ambient state
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to create directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Monitoring control error: {0}")]
    Control(#[from] ControlError),
    #[error("Failed to set up logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    // My errors
    #[error("Failed to get working directory")]
    WorkDir,
}

/// A Heart Rate Measurement payload that can't be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty heart rate payload")]
    Empty,
    #[error("Truncated heart rate payload: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// Failures reported by a [`BlePlatform`](crate::platform::BlePlatform) implementation
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Bluetooth Error: {0}")]
    Bt(#[from] btleplug::Error),
    #[error("No Bluetooth adapters found! Make sure it's plugged in and enabled.")]
    NoAdapter,
    #[error("Unknown device: \"{0}\"")]
    UnknownDevice(String),
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Unknown event listener")]
    UnknownListener,
}

/// Reasons a session never made it to (or fell out of) Monitoring
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No HR device found.")]
    NoDevice,
    #[error("Device discovery failed: {0}")]
    Discovery(#[source] PlatformError),
    #[error("Failed to connect: {0}")]
    Connect(#[source] PlatformError),
    #[error("HR Service not found: {0}")]
    Service(#[source] PlatformError),
    #[error("HR Measurement Characteristic not found: {0}")]
    Characteristic(#[source] PlatformError),
    #[error("Failed to subscribe to HR notifications: {0}")]
    Subscribe(#[source] PlatformError),
    #[error("Stop requested")]
    Cancelled,
}

/// Errors returned synchronously by the [`MonitorController`](crate::controller::MonitorController)
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Monitoring is already running")]
    AlreadyRunning,
    #[error("Failed to spawn worker thread: {0}")]
    ThreadCreation(#[source] std::io::Error),
    #[error("Monitoring is not running")]
    NotRunning,
    #[error("Worker thread panicked")]
    Join,
    #[error("Can't stop monitoring from inside a monitoring callback")]
    StopFromWorker,
}

impl ControlError {
    /// Integer returned across the exported control surface
    pub fn code(&self) -> i32 {
        match self {
            ControlError::AlreadyRunning | ControlError::NotRunning => -1,
            ControlError::ThreadCreation(_) | ControlError::Join | ControlError::StopFromWorker => {
                -2
            }
        }
    }
}
