#![deny(unused_must_use)]
#[macro_use]
extern crate lazy_static;

use std::sync::mpsc;

use tracing::{error, info};

use crate::args::{SubCommands, TopLevelCmd};
use crate::controller::MonitorController;
use crate::errors::AppError;
use crate::heart_rate::StatusCode;
use crate::platform::btle::BtleplugPlatform;
use crate::platform::dummy::DummyPlatform;
use crate::platform::BlePlatform;
use crate::settings::{BLESettings, Settings};

pub mod args;
pub mod callbacks;
pub mod controller;
pub mod errors;
pub mod ffi;
pub mod heart_rate;
pub mod logging;
pub mod platform;
pub mod settings;

/// Runs one monitoring session without a host application, logging whatever it reports.
///
/// Returns once the session stops on its own or `shutdown` receives anything.
pub fn run_headless(
    arg_config: &TopLevelCmd,
    settings: Settings,
    shutdown: mpsc::Receiver<()>,
) -> Result<(), AppError> {
    match &arg_config.subcommands {
        Some(SubCommands::Dummy(_)) => {
            let dummy_settings = settings.dummy.clone();
            let controller = MonitorController::new(settings.ble, move |_: &BLESettings| {
                DummyPlatform::new(dummy_settings.clone())
            });
            run_controller(controller, shutdown)
        }
        Some(SubCommands::Ble(ble_cmd)) => {
            let mut ble_settings = settings.ble;
            if let Some(address) = &ble_cmd.address {
                ble_settings.saved_address = address.clone();
            }
            run_controller(ble_controller(ble_settings), shutdown)
        }
        None => run_controller(ble_controller(settings.ble), shutdown),
    }
}

fn ble_controller(ble_settings: BLESettings) -> MonitorController<BtleplugPlatform> {
    MonitorController::new(ble_settings, |ble_settings: &BLESettings| {
        BtleplugPlatform::new(ble_settings.scan_duration())
    })
}

fn run_controller<P: BlePlatform + 'static>(
    controller: MonitorController<P>,
    shutdown: mpsc::Receiver<()>,
) -> Result<(), AppError> {
    // Anything the session reports as Stopped wakes up the wait below
    let (stopped_tx, stopped_rx) = mpsc::channel::<()>();
    let shutdown_tx = stopped_tx.clone();
    std::thread::spawn(move || {
        if shutdown.recv().is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    controller.register_status_callback(Some(Box::new(move |status, message| {
        if status == StatusCode::Stopped {
            let _ = stopped_tx.send(());
        }
        info!("[{}] {message}", i32::from(status));
    })));
    controller.register_heart_rate_callback(Some(Box::new(|bpm| info!("{bpm} BPM"))));

    info!("Starting session... v{}", env!("CARGO_PKG_VERSION"));
    controller.start()?;
    if stopped_rx.recv().is_err() {
        error!("Status channel closed unexpectedly");
    }

    info!("Shutting down gracefully...");
    controller.stop()?;
    Ok(())
}
