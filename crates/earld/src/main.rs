//! earld, the access control daemon.
//!
//! Supervises the serial wall terminals, owns the shared backends (user
//! store, event bus, physical actions) and runs until killed.

mod cli;
mod observer;
mod supervisor;

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use earl_actions::{PhysicalActions, SysfsGpio};
use earl_auth::FileStoreAuthenticator;
use earl_bus::{AppEvent, AppEventKind, ApplicationBus};
use earl_core::{Clock, SystemClock, Target};

use crate::cli::Config;
use crate::supervisor::Backends;

const WAV_PLAYER: &str = "/usr/bin/aplay";

fn init_logging(config: &Config) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| format!("cannot open log file {}: {err}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn list_users(auth: &FileStoreAuthenticator) {
    for user in auth.users() {
        let expiry = user
            .expiry_date()
            .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<15} {:<28} {:<28} {}",
            user.level, user.name, user.contact_info, expiry
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match cli::parse() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("earld: {err}");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = init_logging(&config) {
        eprintln!("earld: {err}");
        return ExitCode::FAILURE;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = ApplicationBus::new(clock.clone());

    let auth = match FileStoreAuthenticator::open(&config.users_file, bus.clone(), clock.clone())
    {
        Ok(auth) => Arc::new(auth),
        Err(err) => {
            error!(users = %config.users_file.display(), %err, "cannot read user file");
            return ExitCode::FAILURE;
        }
    };

    if config.list_users {
        list_users(&auth);
        return ExitCode::SUCCESS;
    }
    if config.devices.is_empty() {
        eprintln!("earld: no serial devices given, see --help");
        return ExitCode::from(2);
    }

    info!(version = earl_core::VERSION, "starting");

    let actions = PhysicalActions::new(
        SysfsGpio::new(),
        &config.bell_dir,
        WAV_PLAYER,
        clock.clone(),
    );
    tokio::spawn(actions.run(bus.clone()));

    if let Some(port) = config.tcp_port {
        tokio::spawn(observer::serve(bus.clone(), port));
    }

    let backends = Backends {
        bus: bus.clone(),
        auth,
        clock,
    };
    for (device, baudrate) in &config.devices {
        tokio::spawn(supervisor::handle_serial_device(
            device.clone(),
            *baudrate,
            backends.clone(),
        ));
    }

    bus.post(
        AppEvent::new(AppEventKind::EarlStarted, Target::new("earl"))
            .source("earld")
            .msg("Started"),
    )
    .await;

    // The supervisor loops never return; the process lives until killed.
    std::future::pending::<()>().await;
    ExitCode::SUCCESS
}
