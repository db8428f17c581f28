use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A named access point. Terminals identify themselves with one of these
/// names during the serial handshake; bus events are addressed by them.
///
/// The set is open: an unknown name still round-trips through events and
/// logs, the supervisor just won't mount a handler for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub const GATE: &'static str = "gate";
    pub const UPSTAIRS: &'static str = "upstairs";
    pub const ELEVATOR: &'static str = "elevator";
    pub const CONTROL_UI: &'static str = "control";

    pub fn new(name: impl Into<String>) -> Self {
        Target(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Is this one of the entrance targets that maps to a door strike?
    #[must_use]
    pub fn is_entrance(&self) -> bool {
        matches!(self.0.as_str(), Self::GATE | Self::UPSTAIRS | Self::ELEVATOR)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::new(s)
    }
}

/// Membership level of a user record.
///
/// Member and Philanthropist are the privileged roles: 24-hour access and
/// the right to mutate the user store. The others are time-restricted, and
/// Hiatus is always denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Member,
    Philanthropist,
    Fulltime,
    User,
    Hiatus,
}

impl Level {
    /// Token used in the user CSV file.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Member => "member",
            Level::Philanthropist => "philanthropist",
            Level::Fulltime => "fulltime",
            Level::User => "user",
            Level::Hiatus => "hiatus",
        }
    }

    /// May a user of this level add, update or delete other users?
    #[must_use]
    pub fn may_modify_users(&self) -> bool {
        matches!(self, Level::Member | Level::Philanthropist)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim() {
            "member" => Ok(Level::Member),
            "philanthropist" => Ok(Level::Philanthropist),
            "fulltime" => Ok(Level::Fulltime),
            "user" => Ok(Level::User),
            "hiatus" => Ok(Level::Hiatus),
            other => Err(Error::Config(format!("unknown user level '{other}'"))),
        }
    }
}

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Not authorized.
    Fail,
    /// Known code, but outside its validity period.
    Expired,
    /// User ok; blocked by the time-of-day policy for their level.
    OkOutsideHours,
    Ok,
}

impl AuthDecision {
    #[must_use]
    pub fn granted(&self) -> bool {
        matches!(self, AuthDecision::Ok)
    }
}

/// Buzzer tone selector, as the terminal firmware understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    High,
    Low,
}

impl Tone {
    #[must_use]
    pub fn code(&self) -> char {
        match self {
            Tone::High => 'H',
            Tone::Low => 'L',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("member", Level::Member)]
    #[case("philanthropist", Level::Philanthropist)]
    #[case("fulltime", Level::Fulltime)]
    #[case("user", Level::User)]
    #[case("hiatus", Level::Hiatus)]
    fn level_roundtrip(#[case] token: &str, #[case] level: Level) {
        assert_eq!(token.parse::<Level>().unwrap(), level);
        assert_eq!(level.as_str(), token);
    }

    #[test]
    fn level_unknown_token() {
        assert!("wizard".parse::<Level>().is_err());
    }

    #[test]
    fn modify_rights() {
        assert!(Level::Member.may_modify_users());
        assert!(Level::Philanthropist.may_modify_users());
        assert!(!Level::Fulltime.may_modify_users());
        assert!(!Level::User.may_modify_users());
        assert!(!Level::Hiatus.may_modify_users());
    }

    #[test]
    fn entrance_targets() {
        assert!(Target::new("gate").is_entrance());
        assert!(Target::new("upstairs").is_entrance());
        assert!(Target::new("elevator").is_entrance());
        assert!(!Target::new("control").is_entrance());
        assert!(!Target::new("roof").is_entrance());
    }

    #[test]
    fn tone_codes() {
        assert_eq!(Tone::High.code(), 'H');
        assert_eq!(Tone::Low.code(), 'L');
    }
}
