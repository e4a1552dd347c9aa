use std::sync::mpsc;

use color_eyre::eyre::WrapErr;
use pulse_tether::args::TopLevelCmd;
use pulse_tether::logging::init_logging;
use pulse_tether::settings::{default_config_path, determine_working_directory, Settings};
use tracing::{info, warn};

fn main() -> color_eyre::Result<()> {
    human_panic::setup_panic!();
    color_eyre::install()?;

    let arg_config: TopLevelCmd = argh::from_env();

    let config_path = match &arg_config.config_override {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let settings = Settings::load(Some(&config_path), arg_config.config_required)
        .wrap_err_with(|| format!("Failed to load config from {}", config_path.display()))?;
    if !arg_config.no_save {
        // Try to create a default config file
        settings.save(&config_path)?;
    }

    let log_dir = determine_working_directory()
        .or_else(|| config_path.parent().map(|p| p.to_path_buf()))
        .unwrap_or_default();
    let log_name = concat!(env!("CARGO_PKG_NAME"), ".log");
    let _guard = init_logging(&log_dir.join(log_name), settings.get_log_level(), true)?;
    info!("Loaded config from: {}", config_path.display());

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Ctrl-C handling unavailable: {e}");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("Got Ctrl-C");
            let _ = shutdown_tx.send(());
        }
    });

    pulse_tether::run_headless(&arg_config, settings, shutdown_rx)?;
    Ok(())
}
