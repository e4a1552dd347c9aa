use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::heart_rate::StatusCode;

pub type StatusCallback = Box<dyn Fn(StatusCode, &str) + Send + Sync>;
pub type HeartRateCallback = Box<dyn Fn(u16) + Send + Sync>;

#[derive(Default)]
struct CallbackRegistry {
    status: Option<StatusCallback>,
    heart_rate: Option<HeartRateCallback>,
}

/// The emission path shared between the host-facing controller and its worker.
///
/// Callbacks are invoked synchronously while the registry lock is held, so they
/// must not register callbacks or stop monitoring themselves.
#[derive(Clone, Default)]
pub struct Reporter {
    callbacks: Arc<Mutex<CallbackRegistry>>,
    current_status: Arc<AtomicI32>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, CallbackRegistry> {
        // A panicking host callback shouldn't take the whole registry down with it
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        self.registry().status = callback;
    }

    pub fn set_heart_rate_callback(&self, callback: Option<HeartRateCallback>) {
        self.registry().heart_rate = callback;
    }

    pub fn status(&self, status: StatusCode, message: &str) {
        self.current_status
            .store(status.into(), Ordering::SeqCst);
        if status.is_error() {
            warn!("Status {status:?}: {message}");
        } else {
            info!("Status {status:?}: {message}");
        }
        if let Some(callback) = &self.registry().status {
            callback(status, message);
        }
    }

    pub fn heart_rate(&self, bpm: u16) {
        debug!("BPM: {bpm}");
        if let Some(callback) = &self.registry().heart_rate {
            callback(bpm);
        }
    }

    pub fn current_status(&self) -> StatusCode {
        let raw = self.current_status.load(Ordering::SeqCst);
        // Only ever written from a StatusCode
        StatusCode::try_from(raw).unwrap_or(StatusCode::RuntimeError)
    }

    pub fn reset(&self) {
        self.current_status
            .store(StatusCode::Stopped.into(), Ordering::SeqCst);
    }
}
