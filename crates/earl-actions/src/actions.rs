//! Physical actions driven by bus events.
//!
//! Handlers never touch hardware directly; they post `OpenRequest`,
//! `DoorbellTrigger` and `HushBellRequest` events, and this single task
//! turns them into strike pulses and bell sounds. Keeping the
//! `next_allowed_*` rate-limit maps inside one task means they need no
//! locking at all.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use earl_bus::{AppEventKind, ApplicationBus};
use earl_core::constants::{DOOR_OPEN_RATE_LIMIT, DOOR_OPEN_TIME, DOORBELL_RATE_LIMIT};
use earl_core::{Clock, Target, span};

use crate::gpio::{STRIKE_PINS, SysfsGpio, strike_pin};

pub struct PhysicalActions {
    gpio: SysfsGpio,
    bell_dir: PathBuf,
    wav_player: PathBuf,
    clock: Arc<dyn Clock>,
    next_allowed_open: HashMap<Target, DateTime<Local>>,
    next_allowed_ring: HashMap<Target, DateTime<Local>>,
}

impl PhysicalActions {
    /// Set up the strikes and remember where the bell sounds live.
    pub fn new(
        gpio: SysfsGpio,
        bell_dir: impl Into<PathBuf>,
        wav_player: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        for pin in STRIKE_PINS {
            gpio.init_output(pin);
        }
        PhysicalActions {
            gpio,
            bell_dir: bell_dir.into(),
            wav_player: wav_player.into(),
            clock,
            next_allowed_open: HashMap::new(),
            next_allowed_ring: HashMap::new(),
        }
    }

    /// Consume action events from the bus until it shuts down.
    pub async fn run(mut self, bus: ApplicationBus) {
        let mut events = bus.subscribe(4).await;
        while let Some(event) = events.recv().await {
            match event.kind {
                AppEventKind::OpenRequest => {
                    self.open_door(&event.target);
                }
                AppEventKind::DoorbellTrigger => {
                    self.ring_bell(&event.target);
                }
                AppEventKind::HushBellRequest => {
                    if let Some(until) = event.timeout {
                        self.hush(&event.target, until);
                    }
                }
                _ => {}
            }
        }
    }

    /// Latch the strike for the target, unless an open is already in
    /// flight. Returns whether the strike was triggered.
    pub fn open_door(&mut self, target: &Target) -> bool {
        let now = self.clock.now();
        if self
            .next_allowed_open
            .get(target)
            .is_some_and(|next| now < *next)
        {
            // Still opening from the previous request; don't interfere.
            debug!(%target, "open request dropped, strike busy");
            return false;
        }
        let Some(pin) = strike_pin(target) else {
            warn!(%target, "don't know how to open this target");
            return false;
        };
        self.next_allowed_open.insert(
            target.clone(),
            now + span(DOOR_OPEN_TIME) + span(DOOR_OPEN_RATE_LIMIT),
        );

        info!(%target, pin, "opening door");
        let gpio = self.gpio.clone();
        tokio::spawn(async move {
            gpio.set(pin, true);
            tokio::time::sleep(DOOR_OPEN_TIME).await;
            gpio.set(pin, false);
        });

        // The door was opened; the visitor is being admitted, so the
        // bell may ring again right away.
        self.next_allowed_ring.insert(target.clone(), now);
        true
    }

    /// Play the target's bell sound, unless hushed or rate limited.
    /// Returns whether a sound was started.
    pub fn ring_bell(&mut self, target: &Target) -> bool {
        let now = self.clock.now();
        if self
            .next_allowed_ring
            .get(target)
            .is_some_and(|next| now < *next)
        {
            return false; // Hushed.
        }
        self.next_allowed_ring
            .insert(target.clone(), now + span(DOORBELL_RATE_LIMIT));

        let wav = self.bell_dir.join(format!("{target}.wav"));
        if wav.exists() {
            info!(%target, wav = %wav.display(), "ringing doorbell");
            let player = self.wav_player.clone();
            tokio::spawn(async move {
                match tokio::process::Command::new(&player).arg(&wav).status().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => warn!(%status, "bell player exited uncleanly"),
                    Err(err) => warn!(player = %player.display(), %err, "could not run bell player"),
                }
            });
        } else {
            warn!(%target, wav = %wav.display(), "no bell sound for target");
        }
        true
    }

    /// Keep the bell quiet for the target until the given instant.
    pub fn hush(&mut self, target: &Target, until: DateTime<Local>) {
        debug!(%target, %until, "bell hushed");
        self.next_allowed_ring.insert(target.clone(), until);
    }
}
