//! A user record and its derived policy.
//!
//! One CSV line per record, seven fields:
//! `name,contact,level,sponsors,valid_from,valid_to,codes`
//! where sponsors and codes are semicolon-joined salted digests and the
//! dates are `YYYY-MM-DD HH:MM` or empty. `#`-prefixed lines are comments.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeDelta, TimeZone, Timelike, Weekday};
use tracing::warn;

use earl_core::constants::ANONYMOUS_USER_LIFETIME_DAYS;
use earl_core::{Level, hash_auth_code, meets_min_code_length};

use crate::hours::HolidayCalendar;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub name: String,
    pub contact_info: String,
    pub level: Level,
    /// Credential digests of the members who vouched for this record.
    pub sponsors: Vec<String>,
    pub valid_from: Option<DateTime<Local>>,
    pub valid_to: Option<DateTime<Local>>,
    /// Salted digests of the record's credential codes.
    pub codes: Vec<String>,
}

impl User {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        User {
            name: name.into(),
            contact_info: String::new(),
            level,
            sponsors: Vec::new(),
            valid_from: None,
            valid_to: None,
            codes: Vec::new(),
        }
    }

    /// Replace the record's codes with the digest of `plain`. Refuses
    /// codes below the minimum length.
    pub fn set_auth_code(&mut self, plain: &str) -> bool {
        if !meets_min_code_length(plain) {
            return false;
        }
        self.codes = vec![hash_auth_code(plain)];
        true
    }

    #[must_use]
    pub fn has_contact_info(&self) -> bool {
        !self.contact_info.trim().is_empty()
    }

    /// The instant this record stops being valid, if any.
    ///
    /// Records without contact info are anonymous day-pass style entries;
    /// they expire 30 days after `valid_from` even when no `valid_to` is
    /// stored.
    #[must_use]
    pub fn expiry_date(&self) -> Option<DateTime<Local>> {
        if self.valid_to.is_some() {
            return self.valid_to;
        }
        if !self.has_contact_info() {
            return self
                .valid_from
                .map(|from| from + TimeDelta::days(ANONYMOUS_USER_LIFETIME_DAYS));
        }
        None
    }

    #[must_use]
    pub fn in_validity_period(&self, now: DateTime<Local>) -> bool {
        if let Some(from) = self.valid_from
            && now < from
        {
            return false;
        }
        match self.expiry_date() {
            Some(to) => now < to,
            None => true,
        }
    }

    /// Access window `(from_hour, to_hour)` for this record's level.
    /// An hour h grants access iff `from <= h < to`.
    #[must_use]
    pub fn access_hours(&self, now: DateTime<Local>, holidays: &HolidayCalendar) -> (u32, u32) {
        match self.level {
            Level::Member | Level::Philanthropist => (0, 24),
            Level::Fulltime => (7, 24),
            Level::User => {
                let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
                if weekend || holidays.is_holiday(now.date_naive()) {
                    (13, 22)
                } else {
                    (11, 22)
                }
            }
            Level::Hiatus => (0, 0),
        }
    }

    /// Is `now` inside this record's access window?
    #[must_use]
    pub fn in_access_hours(&self, now: DateTime<Local>, holidays: &HolidayCalendar) -> bool {
        let (from, to) = self.access_hours(now, holidays);
        (from..to).contains(&now.hour())
    }

    /// Parse one CSV record. Comment handling and framing happen in the
    /// reader; this only rejects rows that don't carry seven usable
    /// fields. Rejected rows are logged, never fatal.
    pub fn from_record(record: &csv::StringRecord) -> Option<User> {
        if record.len() < 7 {
            if !record.iter().all(|f| f.trim().is_empty()) {
                warn!(fields = record.len(), "skipping short user row");
            }
            return None;
        }
        let level = match record[2].parse::<Level>() {
            Ok(level) => level,
            Err(_) => {
                warn!(level = &record[2], "skipping user row with unknown level");
                return None;
            }
        };
        Some(User {
            name: record[0].to_string(),
            contact_info: record[1].to_string(),
            level,
            sponsors: split_list(&record[3]),
            valid_from: parse_date(&record[4]),
            valid_to: parse_date(&record[5]),
            codes: split_list(&record[6]),
        })
    }

    /// The seven CSV fields of this record, in file order.
    pub fn to_fields(&self) -> [String; 7] {
        [
            self.name.clone(),
            self.contact_info.clone(),
            self.level.as_str().to_string(),
            self.sponsors.join(";"),
            format_date(self.valid_from),
            format_date(self.valid_to),
            self.codes.join(";"),
        ]
    }
}

fn split_list(field: &str) -> Vec<String> {
    field
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_date(field: &str) -> Option<DateTime<Local>> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    let naive = match NaiveDateTime::parse_from_str(field, DATE_FORMAT) {
        Ok(naive) => naive,
        Err(err) => {
            warn!(field, %err, "unparseable date in user row");
            return None;
        }
    };
    // Earliest occurrence on DST fall-back; None only in the spring-forward
    // gap, which we treat like an absent date.
    Local.from_local_datetime(&naive).earliest()
}

fn format_date(date: Option<DateTime<Local>>) -> String {
    match date {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => String::new(),
    }
}
