//! One reconnect loop per serial device.
//!
//! Terminals are dispatched by the name they report: the entrance names
//! get an [`EntranceHandler`], the control terminal the
//! [`ControlUiHandler`]. An unrecognized name is logged and left alone,
//! but the loop keeps retrying in case the box gets reflashed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use earl_auth::FileStoreAuthenticator;
use earl_bus::{AppEvent, AppEventKind, ApplicationBus};
use earl_core::constants::{INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY};
use earl_core::{Clock, Target};
use earl_handlers::{ControlUiHandler, EntranceHandler};
use earl_terminal::{SerialTerminal, Terminal, TerminalEventHandler};

/// The shared singletons every handler hangs onto.
#[derive(Clone)]
pub struct Backends {
    pub bus: ApplicationBus,
    pub auth: Arc<FileStoreAuthenticator>,
    pub clock: Arc<dyn Clock>,
}

/// Handler dispatch by terminal name, one variant per handler kind.
enum EventHandler {
    Entrance(EntranceHandler<FileStoreAuthenticator>),
    ControlUi(ControlUiHandler<FileStoreAuthenticator>),
}

impl EventHandler {
    fn for_target(target: &Target, backends: &Backends) -> Option<EventHandler> {
        if target.is_entrance() {
            Some(EventHandler::Entrance(EntranceHandler::new(
                backends.auth.clone(),
                backends.bus.clone(),
                backends.clock.clone(),
            )))
        } else if target.as_str() == Target::CONTROL_UI {
            Some(EventHandler::ControlUi(ControlUiHandler::new(
                backends.auth.clone(),
                backends.bus.clone(),
                backends.clock.clone(),
            )))
        } else {
            None
        }
    }
}

impl TerminalEventHandler for EventHandler {
    async fn init(&mut self, terminal: &mut impl Terminal) {
        match self {
            EventHandler::Entrance(handler) => handler.init(terminal).await,
            EventHandler::ControlUi(handler) => handler.init(terminal).await,
        }
    }

    async fn handle_keypress(&mut self, terminal: &mut impl Terminal, key: u8) {
        match self {
            EventHandler::Entrance(handler) => handler.handle_keypress(terminal, key).await,
            EventHandler::ControlUi(handler) => handler.handle_keypress(terminal, key).await,
        }
    }

    async fn handle_rfid(&mut self, terminal: &mut impl Terminal, rfid: &str) {
        match self {
            EventHandler::Entrance(handler) => handler.handle_rfid(terminal, rfid).await,
            EventHandler::ControlUi(handler) => handler.handle_rfid(terminal, rfid).await,
        }
    }

    async fn handle_tick(&mut self, terminal: &mut impl Terminal) {
        match self {
            EventHandler::Entrance(handler) => handler.handle_tick(terminal).await,
            EventHandler::ControlUi(handler) => handler.handle_tick(terminal).await,
        }
    }

    async fn handle_shutdown(&mut self, terminal: &mut impl Terminal) {
        match self {
            EventHandler::Entrance(handler) => handler.handle_shutdown(terminal).await,
            EventHandler::ControlUi(handler) => handler.handle_shutdown(terminal).await,
        }
    }
}

/// Keep one serial device connected and its handler running, forever.
pub async fn handle_serial_device(device: String, baudrate: u32, backends: Backends) {
    let mut retry = INITIAL_RECONNECT_DELAY;
    let mut connected_last_round = true;
    loop {
        if !connected_last_round {
            tokio::time::sleep(retry).await;
            retry = (retry * 2).min(MAX_RECONNECT_DELAY);
        }
        connected_last_round = false;

        let mut terminal = match SerialTerminal::open(&device, baudrate).await {
            Ok(terminal) => terminal,
            Err(err) => {
                debug!("{device}:{baudrate}: {err}");
                continue;
            }
        };

        let target = Target::new(terminal.name());
        let Some(mut handler) = EventHandler::for_target(&target, &backends) else {
            warn!("{device}:{baudrate}: terminal with unrecognized name '{target}'");
            terminal.shutdown();
            continue;
        };

        connected_last_round = true;
        retry = INITIAL_RECONNECT_DELAY;
        info!("{device}:{baudrate}: connected to '{target}'");
        backends
            .bus
            .post(
                AppEvent::new(AppEventKind::TerminalConnect, target.clone())
                    .source("supervisor")
                    .msg(&device),
            )
            .await;

        terminal.run_event_loop(&mut handler).await;

        backends
            .bus
            .post(
                AppEvent::new(AppEventKind::TerminalDisconnect, target.clone())
                    .source("supervisor")
                    .msg(&device),
            )
            .await;
        terminal.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use earl_core::ManualClock;

    async fn backends() -> (Backends, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(&path, "# empty\n").unwrap();

        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(
            Local.with_ymd_and_hms(2014, 10, 10, 16, 0, 0).unwrap(),
        ));
        let bus = ApplicationBus::new(clock.clone());
        let auth =
            Arc::new(FileStoreAuthenticator::open(&path, bus.clone(), clock.clone()).unwrap());
        (Backends { bus, auth, clock }, dir)
    }

    #[tokio::test]
    async fn dispatch_by_terminal_name() {
        let (backends, _guard) = backends().await;

        for name in ["gate", "upstairs", "elevator"] {
            assert!(matches!(
                EventHandler::for_target(&Target::new(name), &backends),
                Some(EventHandler::Entrance(_))
            ));
        }
        assert!(matches!(
            EventHandler::for_target(&Target::new("control"), &backends),
            Some(EventHandler::ControlUi(_))
        ));
        assert!(
            EventHandler::for_target(&Target::new("broom-closet"), &backends).is_none()
        );
    }
}
