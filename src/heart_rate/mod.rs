pub mod measurement;
pub mod session;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use uuid::Uuid;

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Status codes shared with the host, both through the status callback
/// and as the value returned when polling for the current status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum StatusCode {
    /// Also used for "never started"
    #[default]
    Stopped = 0,
    Scanning = 1,
    Connecting = 2,
    Discovering = 3,
    Subscribing = 4,
    Disconnected = 5,
    Streaming = 10,
    Stopping = 11,
    CleanupError = 98,
    RuntimeError = 99,
}

impl StatusCode {
    pub fn is_error(self) -> bool {
        matches!(self, StatusCode::CleanupError | StatusCode::RuntimeError)
    }
}

/// Where a [`Session`](session::Session) is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    ResolvingServices,
    Subscribing,
    Monitoring,
    Stopping,
    Stopped,
    Failed,
}
