//! Relay control through the sysfs GPIO interface.
//!
//! The strikes hang off relays with negative logic: writing `0` to the
//! value file energizes the relay. All errors are logged and swallowed;
//! a missing pin must never take the daemon down, the worst case is a
//! door that needs a physical key.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use earl_core::Target;

/// GPIO pins wired to the door strikes. Pin 8 is the spare relay.
pub const STRIKE_PINS: [u32; 4] = [7, 11, 9, 8];

/// Which pin opens which target.
#[must_use]
pub fn strike_pin(target: &Target) -> Option<u32> {
    match target.as_str() {
        Target::GATE => Some(7),
        Target::UPSTAIRS => Some(11),
        Target::ELEVATOR => Some(9),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::at_root("/sys/class/gpio")
    }

    /// Alternate sysfs root, so tests can watch pin writes in a temp dir.
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        SysfsGpio { root: root.into() }
    }

    /// Export the pin and configure it as a de-energized output.
    pub fn init_output(&self, pin: u32) {
        // Export fails when the pin already exists; that is fine.
        if let Err(err) = self.write(&self.root.join("export"), &format!("{pin}\n")) {
            warn!(pin, %err, "GPIO export failed, continuing");
        }
        let direction = self.root.join(format!("gpio{pin}")).join("direction");
        if let Err(err) = self.write(&direction, "out\n") {
            warn!(pin, %err, "could not configure GPIO direction");
        }
        self.set(pin, false);
    }

    /// Switch the relay on the pin. Negative logic on the wire.
    pub fn set(&self, pin: u32, energized: bool) {
        let value = self.root.join(format!("gpio{pin}")).join("value");
        let bits = if energized { "0\n" } else { "1\n" };
        if let Err(err) = self.write(&value, bits) {
            warn!(pin, energized, %err, "could not switch relay");
        }
    }

    fn write(&self, path: &std::path::Path, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(content.as_bytes())
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}
