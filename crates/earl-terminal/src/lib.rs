//! Serial protocol driver for the wall terminals.
//!
//! Each terminal is a small board with RFID reader, keypad, two-line LCD,
//! RGB indicator and piezo buzzer behind a newline-framed ASCII serial
//! protocol. [`SerialTerminal`] owns one such line: it multiplexes
//! request/response command traffic with the asynchronous key/RFID event
//! stream and feeds a [`TerminalEventHandler`] from its pump loop.

pub mod codec;
pub mod mock;
pub mod serial;
pub mod traits;

pub use codec::TerminalCodec;
pub use mock::MockTerminal;
pub use serial::SerialTerminal;
pub use traits::{Terminal, TerminalEventHandler};
