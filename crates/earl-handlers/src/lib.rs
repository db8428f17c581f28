//! Event handler state machines for the wall terminals.
//!
//! [`EntranceHandler`] runs at the doors: PIN and RFID in, open requests
//! and doorbell rings out. [`ControlUiHandler`] runs on the LCD terminal
//! inside the space: member menu, enrollment, renewal, and the doorbell
//! answer prompt. Both are wired to their terminal through the
//! `TerminalEventHandler` callbacks and to everything else through the
//! application bus.

pub mod control_ui;
pub mod entrance;

#[cfg(test)]
pub(crate) mod testutil;

pub use control_ui::ControlUiHandler;
pub use entrance::EntranceHandler;
