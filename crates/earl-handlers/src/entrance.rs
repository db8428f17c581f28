//! Handler for a terminal mounted at an entrance.
//!
//! Receives PIN and RFID events, asks the authenticator, and posts the
//! outcome on the bus: `OpenRequest` on success, `DoorbellTrigger` when
//! someone known shows up outside their hours. User feedback is LEDs and
//! feedback tones only. Each entrance has its own independent instance.
//!
//! The green light is deliberately not switched at grant time: the
//! handler lights it when it sees the `OpenRequest` come back around on
//! the bus, so doors opened from elsewhere light the local LED too.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::info;

use earl_auth::Authenticator;
use earl_bus::{AppEvent, AppEventKind, ApplicationBus, Subscription};
use earl_core::constants::{KEYPAD_TIMEOUT, RFID_DEBOUNCE};
use earl_core::{
    AuthDecision, Clock, Target, Tone, meets_min_code_length, scrub_log_value, span,
};
use earl_terminal::{Terminal, TerminalEventHandler};

const GRANT_BUZZ: Duration = Duration::from_millis(500);
const DENY_BUZZ: Duration = Duration::from_millis(200);
const ABANDON_BUZZ: Duration = Duration::from_millis(500);

const RED_TIME: Duration = Duration::from_millis(500);
const BLUE_TIME: Duration = Duration::from_secs(1);
const GREEN_TIME: Duration = Duration::from_secs(2);

pub struct EntranceHandler<A> {
    auth: Arc<A>,
    bus: ApplicationBus,
    clock: Arc<dyn Clock>,

    target: Target,
    events: Option<Subscription>,

    current_code: String,
    last_keypress: DateTime<Local>,
    current_rfid: String,
    next_rfid_allowed: DateTime<Local>,
    color_off_at: Option<DateTime<Local>>,
}

impl<A: Authenticator> EntranceHandler<A> {
    pub fn new(auth: Arc<A>, bus: ApplicationBus, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        EntranceHandler {
            auth,
            bus,
            clock,
            target: Target::new(""),
            events: None,
            current_code: String::new(),
            last_keypress: now,
            current_rfid: String::new(),
            next_rfid_allowed: now,
            color_off_at: None,
        }
    }

    async fn set_color(&mut self, terminal: &mut impl Terminal, color: &str, time: Duration) {
        terminal.show_color(color).await;
        self.color_off_at = Some(self.clock.now() + span(time));
    }

    async fn authenticate(&mut self, terminal: &mut impl Terminal, code: &str, origin: &str) {
        // Too-short codes get no reaction at all: don't buzz or flash
        // for every stray keypress someone probes with.
        if !meets_min_code_length(code) {
            return;
        }
        let user = self.auth.find_user(code);
        let (decision, msg) = self.auth.auth_user(code, &self.target);

        match (decision, user) {
            (AuthDecision::Ok, Some(user)) => {
                terminal.buzz_speaker(Tone::High, GRANT_BUZZ).await;
                // Be sparse: no name in the log, just the level.
                info!("{}: granted. {} Type={}", self.target, origin, user.level);
                self.bus
                    .post(
                        AppEvent::new(AppEventKind::OpenRequest, self.target.clone())
                            .source(origin)
                            .msg("granted"),
                    )
                    .await;
            }
            (AuthDecision::Expired | AuthDecision::OkOutsideHours, user) => {
                // Blue: the token is known but not usable right now.
                // Ring the residents; they may choose to let them in.
                self.set_color(terminal, "B", BLUE_TIME).await;
                terminal.buzz_speaker(Tone::Low, DENY_BUZZ).await;
                let name = user.map(|u| u.name).unwrap_or_default();
                info!(
                    "{}: night/expired doorbell. {} | {} ({})",
                    self.target,
                    msg,
                    origin,
                    scrub_log_value(code)
                );
                self.bus
                    .post(
                        AppEvent::new(AppEventKind::DoorbellTrigger, self.target.clone())
                            .source(origin)
                            .msg(format!("@night:{name}")),
                    )
                    .await;
            }
            _ => {
                // A scrubbed code is enough to correlate repeated
                // attempts without keeping reverse-lookup material.
                self.set_color(terminal, "R", RED_TIME).await;
                terminal.buzz_speaker(Tone::Low, DENY_BUZZ).await;
                info!(
                    "{}: denied. {} | {} ({})",
                    self.target,
                    msg,
                    origin,
                    scrub_log_value(code)
                );
            }
        }
    }
}

impl<A: Authenticator> TerminalEventHandler for EntranceHandler<A> {
    async fn init(&mut self, terminal: &mut impl Terminal) {
        self.target = Target::new(terminal.name());
        self.events = Some(self.bus.subscribe(8).await);
    }

    async fn handle_keypress(&mut self, terminal: &mut impl Terminal, key: u8) {
        self.last_keypress = self.clock.now();
        match key {
            b'#' => {
                if self.current_code.is_empty() {
                    // Just '#': the doorbell.
                    self.bus
                        .post(
                            AppEvent::new(AppEventKind::DoorbellTrigger, self.target.clone())
                                .source("keypad"),
                        )
                        .await;
                } else {
                    let code = std::mem::take(&mut self.current_code);
                    self.authenticate(terminal, &code, "keypad").await;
                }
            }
            b'*' => self.current_code.clear(),
            _ => self.current_code.push(key as char),
        }
    }

    async fn handle_rfid(&mut self, terminal: &mut impl Terminal, rfid: &str) {
        // The reader repeats a held tag every couple hundred ms, faster
        // than authentication runs; drop the repeats.
        let now = self.clock.now();
        if rfid == self.current_rfid && now < self.next_rfid_allowed {
            return;
        }
        self.current_rfid = rfid.to_string();
        self.next_rfid_allowed = now + span(RFID_DEBOUNCE);
        self.authenticate(terminal, rfid, "RFID").await;
    }

    async fn handle_tick(&mut self, terminal: &mut impl Terminal) {
        let now = self.clock.now();

        // Keypad got a partial code but never finished with '#'.
        if !self.current_code.is_empty() && now - self.last_keypress > span(KEYPAD_TIMEOUT) {
            self.current_code.clear();
            terminal.buzz_speaker(Tone::Low, ABANDON_BUZZ).await;
        }

        // The green light follows OpenRequest events, our own included.
        let mut light_green = false;
        while let Some(event) = self.events.as_mut().and_then(Subscription::try_recv) {
            if event.kind == AppEventKind::OpenRequest && event.target == self.target {
                light_green = true;
            }
        }
        if light_green {
            self.set_color(terminal, "G", GREEN_TIME).await;
        }

        if let Some(off_at) = self.color_off_at
            && now >= off_at
        {
            terminal.show_color("").await;
            self.color_off_at = None;
        }
    }

    async fn handle_shutdown(&mut self, _terminal: &mut impl Terminal) {
        if let Some(events) = self.events.take() {
            self.bus.unsubscribe(&events).await;
        }
    }
}
