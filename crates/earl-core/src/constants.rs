use std::time::Duration;

/// LCD geometry of the wall terminals
pub const MAX_LCD_ROWS: usize = 2;
pub const MAX_LCD_COLS: usize = 24;

/// Serial line defaults
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// Terminals answer requests immediately; anything slower is a dead line.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Idle tick delivered to handlers while no events arrive.
pub const IDLE_TICK: Duration = Duration::from_millis(500);

/// Re-verify the terminal name every this many idle ticks.
pub const LIVENESS_TICK_INTERVAL: u32 = 10;

/// Quiet window that ends the connect-time garbage drain.
pub const DRAIN_SILENCE_WINDOW: Duration = Duration::from_millis(300);

/// Supervisor reconnect backoff bounds.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Keypad input is abandoned after this much silence.
pub const KEYPAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Repeated reads of the same RFID tag inside this window are dropped.
pub const RFID_DEBOUNCE: Duration = Duration::from_millis(300);

/// Door strike latch time and the pause enforced between two opens.
pub const DOOR_OPEN_TIME: Duration = Duration::from_secs(2);
pub const DOOR_OPEN_RATE_LIMIT: Duration = Duration::from_millis(500);

/// Minimum pause between two audible doorbell rings.
pub const DOORBELL_RATE_LIMIT: Duration = Duration::from_secs(15);

/// 32-bit Mifare tags are 8 hex chars; this mostly imposes a minimum
/// strength on chosen PINs.
pub const MIN_CODE_LENGTH: usize = 6;

/// Fixed salt prepended to every credential before hashing.
pub const AUTH_CODE_SALT: &str = "MakeThisALittleBitLongerToChewOnEarlFoo";

/// Records without contact info expire this long after valid_from.
pub const ANONYMOUS_USER_LIFETIME_DAYS: i64 = 30;
