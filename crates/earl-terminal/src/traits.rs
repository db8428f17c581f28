//! Interfaces between the terminal driver and the event handlers.
//!
//! A handler implements [`TerminalEventHandler`] and gets every callback
//! together with the terminal it is mounted on, so it can flash LEDs,
//! buzz or write the LCD in direct response to input. Callbacks run
//! sequentially on the terminal's task and must return promptly; anything
//! that takes real time (holding a door strike open, playing a bell
//! sound) belongs on the application bus, handled elsewhere.

use std::future::Future;
use std::time::Duration;

use earl_core::Tone;

/// Operations on the little box mounted next to a door.
pub trait Terminal: Send {
    /// The name the terminal reported in the handshake, e.g. "upstairs".
    fn name(&self) -> &str;

    /// Put `text` on LCD row 0 or 1. Longer lines are truncated to the
    /// display width; writing the same content twice sends nothing.
    fn write_lcd(&mut self, row: usize, text: &str) -> impl Future<Output = ()> + Send;

    /// Set the RGB indicator. `colors` is any combination of 'R', 'G',
    /// 'B' ("RG" shows yellow); empty switches the LEDs off.
    fn show_color(&mut self, colors: &str) -> impl Future<Output = ()> + Send;

    fn buzz_speaker(&mut self, tone: Tone, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Callback interface for events generated by a terminal.
pub trait TerminalEventHandler: Send {
    /// Called once when the handler is mounted on a freshly connected
    /// terminal.
    fn init(&mut self, terminal: &mut impl Terminal) -> impl Future<Output = ()> + Send;

    /// One keypad character, ASCII `0`..`9`, `*` or `#`.
    fn handle_keypress(
        &mut self,
        terminal: &mut impl Terminal,
        key: u8,
    ) -> impl Future<Output = ()> + Send;

    /// An RFID tag held to the reader, as the plain hex code. While the
    /// card stays on the reader this repeats every couple hundred ms.
    fn handle_rfid(
        &mut self,
        terminal: &mut impl Terminal,
        rfid: &str,
    ) -> impl Future<Output = ()> + Send;

    /// Called roughly every 500 ms while the terminal is idle. All
    /// time-dependent handler work (state timeouts, LED off deadlines,
    /// buffered bus events) happens here.
    fn handle_tick(&mut self, terminal: &mut impl Terminal) -> impl Future<Output = ()> + Send;

    /// The connection to the terminal is going away.
    fn handle_shutdown(&mut self, terminal: &mut impl Terminal)
    -> impl Future<Output = ()> + Send;
}
