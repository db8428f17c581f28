//! The daemon's hands: door strikes and the doorbell speaker.

pub mod actions;
pub mod gpio;

pub use actions::PhysicalActions;
pub use gpio::{STRIKE_PINS, SysfsGpio, strike_pin};
