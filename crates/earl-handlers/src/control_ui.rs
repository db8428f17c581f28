//! Handler for the control terminal inside the space.
//!
//! This terminal does not open doors for strangers; it is the members'
//! user interface: verify an RFID card, enroll a new user, renew one,
//! and answer the doorbell. It runs the same serial protocol as the
//! entrances but leans on the LCD.
//!
//! The state machine is driven by keypad/RFID input and by bus events.
//! Bus events land on a subscription that is drained in `handle_tick`,
//! so everything the handler does happens on its own terminal task.
//! Every state except `Idle` carries a timeout back to `Idle`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use tracing::{debug, info};

use earl_auth::{Authenticator, HolidayCalendar, User};
use earl_bus::{AppEvent, AppEventKind, ApplicationBus, Subscription};
use earl_core::constants::MAX_LCD_COLS;
use earl_core::{Clock, Level, Target, span};
use earl_terminal::{Terminal, TerminalEventHandler};

/// How long the doorbell visitor prompt stays up.
const DOORBELL_PROMPT_TIME: Duration = Duration::from_secs(45);
/// Confirmation screen time after hushing the bell.
const POST_HUSH_TIME: Duration = Duration::from_secs(3);
/// Member menu lifetime without input.
const MEMBER_MENU_TIME: Duration = Duration::from_secs(5);
/// Wait for a card during enrollment or renewal.
const AWAIT_RFID_TIME: Duration = Duration::from_secs(30);
/// Info screens interrupt the idle screen for this long.
const SHOW_INFO_TIME: Duration = Duration::from_secs(2);
/// Transient "Opening ..." line after an open request.
const ACTION_MSG_TIME: Duration = Duration::from_secs(2);

/// Each press of '9' buys this much silence, up to the cap.
const HUSH_EXTEND: Duration = Duration::from_secs(60);
const HUSH_CAP: Duration = Duration::from_secs(300);
/// Offer the silence option when bells repeat this quickly.
const RAPID_RING_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UiState {
    /// Nothing to do; idle screen.
    Idle,
    /// Interrupt the idle screen with an info message.
    ShowInfo,
    /// A member showed their RFID; awaiting a menu choice.
    MemberMenu,
    /// Member adds a user: waiting for the new card.
    AwaitNewRfid,
    /// Member renews a user: waiting for that card.
    AwaitUpdateRfid,
    /// Someone rang; offer to open or silence.
    DoorbellPrompt,
}

pub struct ControlUiHandler<A> {
    auth: Arc<A>,
    bus: ApplicationBus,
    clock: Arc<dyn Clock>,
    holidays: HolidayCalendar,

    events: Option<Subscription>,

    state: UiState,
    state_timeout: DateTime<Local>,
    /// Credential of the member currently driving the menu.
    member_code: String,
    /// Counter for generated user names.
    user_counter: u32,

    /// Doorbell waiting to be shown once we are idle.
    pending_doorbell: Option<(Target, String)>,
    doorbell_target: Option<Target>,
    last_doorbell: Option<DateTime<Local>>,
    rapid_ring: bool,

    hush_until: Option<DateTime<Local>>,
    /// Targets currently reported open by their door sensor.
    open_doors: HashSet<Target>,
    /// Short-lived line-1 message, e.g. "Opening upstairs".
    action_msg: Option<(String, DateTime<Local>)>,
}

impl<A: Authenticator> ControlUiHandler<A> {
    pub fn new(auth: Arc<A>, bus: ApplicationBus, clock: Arc<dyn Clock>) -> Self {
        // Semi-random start so generated names don't collide after a
        // daemon restart within the same hour.
        let user_counter = clock.now().second() % 100;
        let now = clock.now();
        ControlUiHandler {
            auth,
            bus,
            clock,
            holidays: HolidayCalendar::default(),
            events: None,
            state: UiState::Idle,
            state_timeout: now,
            member_code: String::new(),
            user_counter,
            pending_doorbell: None,
            doorbell_target: None,
            last_doorbell: None,
            rapid_ring: false,
            hush_until: None,
            open_doors: HashSet::new(),
            action_msg: None,
        }
    }

    fn set_state(&mut self, state: UiState, timeout: Duration) {
        debug!(?state, "control ui state");
        self.state = state;
        self.state_timeout = self.clock.now() + span(timeout);
    }

    async fn back_to_idle(&mut self, terminal: &mut impl Terminal) {
        self.state = UiState::Idle;
        self.member_code.clear();
        self.display_idle_screen(terminal).await;
    }

    async fn display_idle_screen(&mut self, terminal: &mut impl Terminal) {
        let now = self.clock.now();
        let line0 = if let Some(until) = self.hush_until.filter(|until| *until > now) {
            format!("Bell silenced {}s", (until - now).num_seconds())
        } else if let Some(open) = self.open_doors.iter().min_by_key(|t| t.as_str()) {
            format!("{open} : open")
        } else {
            "      Noisebridge".to_string()
        };
        terminal.write_lcd(0, &line0).await;

        let line1 = match &self.action_msg {
            Some((msg, until)) if *until > now => msg.clone(),
            _ => now.format("%Y-%m-%d [%a] %H:%M").to_string(),
        };
        terminal.write_lcd(1, &line1).await;
    }

    async fn present_member_actions(&mut self, terminal: &mut impl Terminal, member: &User) {
        terminal.write_lcd(0, &format!("Howdy {}", member.name)).await;
        terminal.write_lcd(1, "[*]ESC [1]Add [2]Update").await;
        self.set_state(UiState::MemberMenu, MEMBER_MENU_TIME);
    }

    async fn display_user_info(&mut self, terminal: &mut impl Terminal, user: &User) {
        let now = self.clock.now();

        if user.has_contact_info() {
            terminal.write_lcd(0, &format!("Hi {}", user.name)).await;
        } else {
            // No contact info: a temporary record that runs out.
            match user.expiry_date() {
                Some(expiry) => {
                    let days_left = (expiry - now).num_days();
                    if (expiry - now).num_seconds() <= 0 {
                        let line = format!("Exp {}", expiry.format("%Y-%m-%d %H:%M"));
                        terminal.write_lcd(0, &line).await;
                    } else if days_left < 10 {
                        let line = format!("{} (exp {}d)", user.name, days_left);
                        terminal.write_lcd(0, &line).await;
                    } else {
                        terminal.write_lcd(0, &user.name).await;
                    }
                }
                None => terminal.write_lcd(0, &user.name).await,
            }
        }

        if user.in_validity_period(now) {
            let (from, to) = user.access_hours(now, &self.holidays);
            let line = format!("Open doors [{from}:00-{to}:00)");
            terminal.write_lcd(1, &line).await;
        } else {
            terminal.write_lcd(1, "Ask member to renew.").await;
        }
        self.set_state(UiState::ShowInfo, SHOW_INFO_TIME);
    }

    async fn display_doorbell_prompt(&mut self, terminal: &mut impl Terminal, message: &str) {
        let target = match &self.doorbell_target {
            Some(target) => target.clone(),
            None => return,
        };
        let mut text = if message.is_empty() {
            format!("((( {target} )))")
        } else {
            let mut text = format!("( {message}@{target} )");
            while text.len() < 22 {
                text = format!("({text})");
            }
            text
        };
        if text.len() < MAX_LCD_COLS {
            text = format!("{text:^width$}", width = MAX_LCD_COLS)
                .trim_end()
                .to_string();
        }
        terminal.write_lcd(0, &text).await;

        let line1 = if self.rapid_ring {
            "RFID: open [9]Silence[*]"
        } else {
            "RFID: open [*]"
        };
        terminal.write_lcd(1, line1).await;
    }

    async fn enroll_new_user(&mut self, terminal: &mut impl Terminal, rfid: &str) {
        // A name that is somewhat unique and easy to find in the file
        // for later editing.
        let now = self.clock.now();
        self.user_counter = self.user_counter.wrapping_add(1);
        let name = format!("<u{}{:02}>", now.format("%m%d-%H"), self.user_counter % 100);

        let mut user = User::new(name.clone(), Level::User);
        if !user.set_auth_code(rfid) {
            terminal.write_lcd(0, "Trouble: code too short").await;
        } else {
            match self.auth.add_new_user(&self.member_code, user).await {
                Ok(()) => {
                    info!(name, "enrolled new user");
                    terminal.write_lcd(0, &format!("Success! += {name}")).await;
                }
                Err(err) => {
                    terminal.write_lcd(0, &format!("Trouble:{err}")).await;
                }
            }
        }
        terminal.write_lcd(1, "[*] Done    [1] Add More").await;
        self.set_state(UiState::MemberMenu, MEMBER_MENU_TIME);
    }

    async fn renew_user(&mut self, terminal: &mut impl Terminal, rfid: &str) {
        match self.auth.find_user(rfid) {
            None => terminal.write_lcd(0, "Unknown RFID").await,
            Some(user) if user.expiry_date().is_none() => {
                let line = format!("{} does not expire", user.name);
                terminal.write_lcd(0, &line).await;
            }
            Some(_) => {
                // Renewal: the validity window restarts today.
                let now = self.clock.now();
                let result = self
                    .auth
                    .update_user(&self.member_code, rfid, move |user| {
                        user.valid_from = Some(now);
                        true
                    })
                    .await;
                match result {
                    Ok(()) => {
                        let expiry = self
                            .auth
                            .find_user(rfid)
                            .and_then(|user| user.expiry_date());
                        let line = match expiry {
                            Some(expiry) => {
                                format!("Extended to {}", expiry.format("%b %d"))
                            }
                            None => "Extended".to_string(),
                        };
                        terminal.write_lcd(0, &line).await;
                    }
                    Err(err) => terminal.write_lcd(0, &format!("Trouble:{err}")).await,
                }
            }
        }
        terminal.write_lcd(1, "[*] Done [2] Update More").await;
        self.set_state(UiState::MemberMenu, MEMBER_MENU_TIME);
    }

    async fn hush_bell(&mut self, terminal: &mut impl Terminal) {
        let Some(target) = self.doorbell_target.clone() else {
            return;
        };
        let now = self.clock.now();
        let base = self.hush_until.filter(|until| *until > now).unwrap_or(now);
        let until = (base + span(HUSH_EXTEND)).min(now + span(HUSH_CAP));
        self.hush_until = Some(until);

        self.bus
            .post(
                AppEvent::new(AppEventKind::HushBellRequest, target)
                    .source("control")
                    .timeout(until),
            )
            .await;

        let secs = (until - now).num_seconds();
        terminal.write_lcd(1, &format!("Silenced for {secs} sec")).await;
        self.state_timeout = now + span(POST_HUSH_TIME);
    }
}

impl<A: Authenticator> TerminalEventHandler for ControlUiHandler<A> {
    async fn init(&mut self, terminal: &mut impl Terminal) {
        self.events = Some(self.bus.subscribe(8).await);
        self.display_idle_screen(terminal).await;
    }

    async fn handle_keypress(&mut self, terminal: &mut impl Terminal, key: u8) {
        // '*' is always Esc.
        if key == b'*' {
            self.back_to_idle(terminal).await;
            return;
        }

        match self.state {
            UiState::MemberMenu => match key {
                b'1' => {
                    terminal.write_lcd(0, "Read new user RFID").await;
                    terminal.write_lcd(1, "[*] Cancel").await;
                    self.set_state(UiState::AwaitNewRfid, AWAIT_RFID_TIME);
                }
                b'2' => {
                    terminal.write_lcd(0, "Read user RFID to update").await;
                    terminal.write_lcd(1, "[*] Cancel").await;
                    self.set_state(UiState::AwaitUpdateRfid, AWAIT_RFID_TIME);
                }
                _ => {}
            },
            UiState::DoorbellPrompt => {
                if key == b'9' {
                    self.hush_bell(terminal).await;
                }
            }
            _ => {}
        }
    }

    async fn handle_rfid(&mut self, terminal: &mut impl Terminal, rfid: &str) {
        match self.state {
            UiState::Idle => match self.auth.find_user(rfid) {
                None => {
                    terminal.write_lcd(0, "      Unknown RFID").await;
                    terminal.write_lcd(1, "Ask a member to register").await;
                    self.set_state(UiState::ShowInfo, SHOW_INFO_TIME);
                }
                Some(user) if user.level.may_modify_users() => {
                    self.member_code = rfid.to_string();
                    self.present_member_actions(terminal, &user).await;
                }
                Some(user) => {
                    self.display_user_info(terminal, &user).await;
                }
            },
            UiState::AwaitNewRfid => {
                self.enroll_new_user(terminal, rfid).await;
            }
            UiState::AwaitUpdateRfid => {
                self.renew_user(terminal, rfid).await;
            }
            UiState::DoorbellPrompt => {
                // Whoever is inside the space may open the door for a
                // visitor; any known card will do.
                if self.auth.find_user(rfid).is_some() {
                    if let Some(target) = self.doorbell_target.clone() {
                        self.bus
                            .post(
                                AppEvent::new(AppEventKind::OpenRequest, target)
                                    .source("control")
                                    .msg("doorbell answered"),
                            )
                            .await;
                    }
                    self.back_to_idle(terminal).await;
                } else {
                    terminal.write_lcd(1, "     (unknown RFID)").await;
                }
            }
            UiState::ShowInfo | UiState::MemberMenu => {}
        }
    }

    async fn handle_tick(&mut self, terminal: &mut impl Terminal) {
        let now = self.clock.now();

        if self.state != UiState::Idle && now >= self.state_timeout {
            self.back_to_idle(terminal).await;
        }

        // Requests from other tasks arrive through the bus and are
        // consumed here, on the terminal's own task.
        while let Some(event) = self.events.as_mut().and_then(Subscription::try_recv) {
            match event.kind {
                AppEventKind::DoorbellTrigger => {
                    self.rapid_ring = self
                        .last_doorbell
                        .is_some_and(|prev| now - prev < span(RAPID_RING_WINDOW));
                    self.last_doorbell = Some(now);
                    self.pending_doorbell = Some((event.target, event.msg));
                }
                AppEventKind::DoorSensor => {
                    if event.value == Some(1) {
                        self.open_doors.insert(event.target);
                    } else {
                        self.open_doors.remove(&event.target);
                    }
                }
                AppEventKind::OpenRequest => {
                    self.action_msg = Some((
                        format!("Opening {}", event.target),
                        now + span(ACTION_MSG_TIME),
                    ));
                }
                _ => {}
            }
        }

        if self.state == UiState::Idle {
            if let Some((target, message)) = self.pending_doorbell.take() {
                self.doorbell_target = Some(target);
                self.set_state(UiState::DoorbellPrompt, DOORBELL_PROMPT_TIME);
                self.display_doorbell_prompt(terminal, &message).await;
            } else {
                self.display_idle_screen(terminal).await;
            }
        }
    }

    async fn handle_shutdown(&mut self, _terminal: &mut impl Terminal) {
        if let Some(events) = self.events.take() {
            self.bus.unsubscribe(&events).await;
        }
    }
}
