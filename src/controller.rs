use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::callbacks::{HeartRateCallback, Reporter, StatusCallback};
use crate::errors::ControlError;
use crate::heart_rate::session::Session;
use crate::heart_rate::StatusCode;
use crate::platform::BlePlatform;
use crate::settings::BLESettings;

const WORKER_THREAD_NAME: &str = "hr-session";

/// Builds a fresh platform for every session, on the session's own thread
pub type PlatformFactory<P> = Box<dyn Fn(&BLESettings) -> P + Send + Sync>;

struct Worker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Owns the (at most one) worker thread running a [`Session`], and relays its
/// events to whatever callbacks the host registered.
pub struct MonitorController<P: BlePlatform + 'static> {
    platform_factory: Arc<PlatformFactory<P>>,
    ble_settings: Mutex<BLESettings>,
    reporter: Reporter,
    worker: Mutex<Option<Worker>>,
}

impl<P: BlePlatform + 'static> MonitorController<P> {
    pub fn new(
        ble_settings: BLESettings,
        platform_factory: impl Fn(&BLESettings) -> P + Send + Sync + 'static,
    ) -> Self {
        Self {
            platform_factory: Arc::new(Box::new(platform_factory)),
            ble_settings: Mutex::new(ble_settings),
            reporter: Reporter::new(),
            worker: Mutex::new(None),
        }
    }

    /// Takes effect on the next [`start`](Self::start)
    pub fn set_ble_settings(&self, ble_settings: BLESettings) {
        *self
            .ble_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ble_settings;
    }

    pub fn register_status_callback(&self, callback: Option<StatusCallback>) {
        self.reporter.set_status_callback(callback);
    }

    pub fn register_heart_rate_callback(&self, callback: Option<HeartRateCallback>) {
        self.reporter.set_heart_rate_callback(callback);
    }

    pub fn current_status(&self) -> StatusCode {
        self.reporter.current_status()
    }

    /// Resets the polled status, only while nothing is running
    pub fn reset_status(&self) {
        if !self.is_running() {
            self.reporter.reset();
        }
    }

    /// Whether a worker exists that hasn't been joined by [`stop`](Self::stop) yet.
    /// A session that ended on its own (failure or disconnect) doesn't count.
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the worker thread and returns immediately.
    pub fn start(&self) -> Result<(), ControlError> {
        let mut worker = self.lock_worker();
        if let Some(existing) = worker.take() {
            if !existing.handle.is_finished() {
                *worker = Some(existing);
                return Err(ControlError::AlreadyRunning);
            }
            // Last session ended on its own, reap it before starting over
            if existing.handle.join().is_err() {
                warn!("Previous session's worker had panicked");
            }
        }

        let cancel_token = CancellationToken::new();
        let ble_settings = self
            .ble_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let platform_factory = Arc::clone(&self.platform_factory);
        let reporter = self.reporter.clone();
        let worker_token = cancel_token.clone();

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || session_thread(platform_factory, reporter, ble_settings, worker_token))
            .map_err(|e| {
                error!("Failed to spawn worker thread: {e}");
                self.reporter.status(StatusCode::RuntimeError, &e.to_string());
                ControlError::ThreadCreation(e)
            })?;

        info!("Monitoring started");
        *worker = Some(Worker {
            handle,
            cancel_token,
        });
        Ok(())
    }

    /// Signals the worker to stop and blocks until it has fully exited.
    ///
    /// There's no timeout: a platform call that hangs during cleanup
    /// will hang this too.
    pub fn stop(&self) -> Result<(), ControlError> {
        let worker = {
            let mut worker = self.lock_worker();
            let Some(existing) = worker.take() else {
                return Err(ControlError::NotRunning);
            };
            if existing.handle.thread().id() == thread::current().id() {
                // Called from inside one of our callbacks, joining would deadlock
                existing.cancel_token.cancel();
                *worker = Some(existing);
                return Err(ControlError::StopFromWorker);
            }
            existing
        };

        info!("Stopping monitoring...");
        worker.cancel_token.cancel();
        worker.handle.join().map_err(|_| {
            error!("Worker thread panicked");
            ControlError::Join
        })?;
        info!("Monitoring stopped");
        Ok(())
    }
}

impl<P: BlePlatform + 'static> Drop for MonitorController<P> {
    fn drop(&mut self) {
        if self.lock_worker().is_some() {
            if let Err(e) = self.stop() {
                error!("Failed to stop worker on drop: {e}");
            }
        }
    }
}

/// Body of the worker thread: a single-threaded runtime driving one session.
fn session_thread<P: BlePlatform>(
    platform_factory: Arc<PlatformFactory<P>>,
    reporter: Reporter,
    ble_settings: BLESettings,
    cancel_token: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build worker runtime: {e}");
            reporter.status(StatusCode::RuntimeError, &format!("Runtime Error: {e}"));
            reporter.status(StatusCode::Stopped, "Stopped");
            return;
        }
    };

    runtime.block_on(async move {
        let platform = (*platform_factory)(&ble_settings);
        let mut session = Session::new(platform, reporter, ble_settings, cancel_token);
        session.run().await;
    });
}
