//! Flat C ABI for hosts that load this crate as a dynamic library.
//!
//! Every function returns immediately except [`hrm_stop`], which blocks until
//! the session's worker thread has cleaned up and exited. Callbacks run on that
//! worker thread and must not call back into `hrm_start`/`hrm_stop`.
//! They also run while the callback registry is locked, so calling
//! `hrm_register_status_callback` or `hrm_register_heart_rate_callback` from
//! inside one deadlocks.

use std::ffi::{c_char, c_int, CString};
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::callbacks::{HeartRateCallback, StatusCallback};
use crate::controller::MonitorController;
use crate::logging::init_logging;
use crate::platform::btle::BtleplugPlatform;
use crate::settings::{default_config_path, determine_working_directory, BLESettings, Settings};

pub type RawStatusCallback = Option<extern "system" fn(status: c_int, message: *const c_char)>;
pub type RawHeartRateCallback = Option<extern "system" fn(bpm: c_int)>;

lazy_static! {
    static ref CONTROLLER: MonitorController<BtleplugPlatform> =
        MonitorController::new(BLESettings::default(), |ble_settings: &BLESettings| {
            BtleplugPlatform::new(ble_settings.scan_duration())
        });
    static ref LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);
}

/// One-time setup: loads the config file and starts logging.
/// Safe to call more than once.
#[no_mangle]
pub extern "system" fn hrm_initialize() -> c_int {
    let settings = match default_config_path().and_then(|path| Settings::load(Some(&path), false))
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Couldn't load config, using defaults: {e}");
            Settings::load(None, false).unwrap_or_default()
        }
    };

    let mut log_guard = LOG_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    if log_guard.is_none() {
        if let Some(working_directory) = determine_working_directory() {
            let log_path = working_directory.join(concat!(env!("CARGO_CRATE_NAME"), ".log"));
            match init_logging(&log_path, settings.get_log_level(), false) {
                Ok(guard) => *log_guard = Some(guard),
                // Most likely the host already installed a subscriber of its own
                Err(e) => eprintln!("Failed to set up logging: {e}"),
            }
        }
    }

    CONTROLLER.set_ble_settings(settings.ble);
    CONTROLLER.reset_status();
    info!("Initialized v{}", env!("CARGO_PKG_VERSION"));
    0
}

#[no_mangle]
pub extern "system" fn hrm_register_status_callback(callback: RawStatusCallback) -> c_int {
    let callback = callback.map(|callback| -> StatusCallback {
        Box::new(move |status, message| {
            let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
            callback(status.into(), message.as_ptr());
        })
    });
    CONTROLLER.register_status_callback(callback);
    0
}

#[no_mangle]
pub extern "system" fn hrm_register_heart_rate_callback(callback: RawHeartRateCallback) -> c_int {
    let callback = callback.map(|callback| -> HeartRateCallback {
        Box::new(move |bpm| callback(c_int::from(bpm)))
    });
    CONTROLLER.register_heart_rate_callback(callback);
    0
}

/// 0 on success, -1 if already running, -2 if the worker thread couldn't be spawned
#[no_mangle]
pub extern "system" fn hrm_start() -> c_int {
    match CONTROLLER.start() {
        Ok(()) => 0,
        Err(e) => {
            warn!("Start failed: {e}");
            e.code()
        }
    }
}

/// 0 on success, -1 if not running, -2 if the worker couldn't be joined
#[no_mangle]
pub extern "system" fn hrm_stop() -> c_int {
    match CONTROLLER.stop() {
        Ok(()) => 0,
        Err(e) => {
            error!("Stop failed: {e}");
            e.code()
        }
    }
}

#[no_mangle]
pub extern "system" fn hrm_current_status() -> c_int {
    CONTROLLER.current_status().into()
}
