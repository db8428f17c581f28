pub mod clock;
pub mod constants;
pub mod error;
pub mod hash;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, span};
pub use error::{Error, Result};
pub use hash::{hash_auth_code, meets_min_code_length, scrub_log_value};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
