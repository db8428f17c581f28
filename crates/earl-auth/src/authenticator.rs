//! The user store behind every access decision.
//!
//! [`Authenticator`] is the narrow interface handlers program against;
//! [`FileStoreAuthenticator`] is the production implementation over the
//! access CSV file. Lookups go through an index keyed by salted code
//! digests, mutations are fenced by an optimistic revision counter, and
//! the file on disk is the source of truth: adds append a single row,
//! update/delete rewrite the whole file atomically, and an externally
//! edited file is picked up on the next lookup via its mtime.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::DateTime;
use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use earl_bus::{AppEvent, AppEventKind, ApplicationBus};
use earl_core::{
    AuthDecision, Clock, Level, Target, hash_auth_code, meets_min_code_length, scrub_log_value,
};

use crate::hours::HolidayCalendar;
use crate::user::User;

/// Failure of a user-store mutation. The `Display` text is the message
/// shown to the operator (LCD line or log).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Couldn't find member with authentication code")]
    UnknownAuthenticator,

    #[error("Non-member modify attempt")]
    NotPrivileged,

    #[error("Authenticating member expired")]
    AuthenticatorExpired,

    #[error("No user for that code")]
    UnknownUser,

    #[error("Duplicate codes while adding user")]
    DuplicateCodes,

    #[error("Changed while editing")]
    ChangedWhileEditing,

    #[error("Update aborted")]
    UpdateAborted,

    #[error("User file I/O: {0}")]
    Io(#[from] io::Error),

    #[error("User file format: {0}")]
    Csv(#[from] csv::Error),
}

/// What handlers need from the user store.
///
/// `find_user` and `auth_user` are hot-path lookups; the mutations are
/// futures because a successful commit announces itself on the bus.
pub trait Authenticator: Send + Sync {
    /// Look up the user owning `plain_code`. Returns a copy so the caller
    /// cannot alias live store state.
    fn find_user(&self, plain_code: &str) -> Option<User>;

    /// Does the code exist, and may its owner access `target` right now?
    /// The message is for logs and the UI, not for the person at the door.
    fn auth_user(&self, plain_code: &str, target: &Target) -> (AuthDecision, String);

    /// Add `user`, vouched for by the owner of `auth_code`. Appends one
    /// row to the file.
    fn add_new_user(
        &self,
        auth_code: &str,
        user: User,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mutate the user owning `user_code` through `mutate`, which gets a
    /// copy to edit and returns whether to commit. The commit only lands
    /// if the store revision is unchanged since the copy was taken.
    fn update_user<F>(
        &self,
        auth_code: &str,
        user_code: &str,
        mutate: F,
    ) -> impl Future<Output = Result<(), StoreError>> + Send
    where
        F: FnOnce(&mut User) -> bool + Send;

    /// Remove the user owning `user_code`.
    fn delete_user(
        &self,
        auth_code: &str,
        user_code: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-memory image of the user file: ordered slots plus the code index.
/// Deletion nulls a slot; an update reinserts at the same slot so the
/// file keeps its line order across rewrites.
#[derive(Debug, Clone, Default)]
struct UserTable {
    slots: Vec<Option<User>>,
    code_index: HashMap<String, usize>,
    revision: u64,
}

impl UserTable {
    fn load(path: &Path) -> Result<UserTable, StoreError> {
        let file = fs::File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(file);

        let mut table = UserTable::default();
        for record in reader.records() {
            let Some(user) = User::from_record(&record?) else {
                continue;
            };
            if let Err(err) = table.insert(user, None) {
                warn!(%err, "ignoring user row");
            }
        }
        Ok(table)
    }

    fn find(&self, code_hash: &str) -> Option<(usize, &User)> {
        let slot = *self.code_index.get(code_hash)?;
        self.slots[slot].as_ref().map(|user| (slot, user))
    }

    /// Insert at a freed slot, or append when `slot` is `None`. Fails when
    /// any of the user's codes is already claimed.
    fn insert(&mut self, user: User, slot: Option<usize>) -> Result<(), StoreError> {
        if user.codes.iter().any(|c| self.code_index.contains_key(c)) {
            return Err(StoreError::DuplicateCodes);
        }
        let at = match slot {
            Some(at) => {
                debug_assert!(self.slots[at].is_none(), "slot reuse of a live slot");
                at
            }
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        for code in &user.codes {
            self.code_index.insert(code.clone(), at);
        }
        self.slots[at] = Some(user);
        Ok(())
    }

    fn remove(&mut self, slot: usize) -> Option<User> {
        let user = self.slots.get_mut(slot)?.take()?;
        for code in &user.codes {
            self.code_index.remove(code);
        }
        Some(user)
    }

    fn users(&self) -> impl Iterator<Item = &User> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    fn to_csv_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for user in self.users() {
            writer.write_record(user.to_fields())?;
        }
        writer
            .into_inner()
            .map_err(|err| StoreError::Io(io::Error::other(err)))
    }
}

struct FileState {
    mtime: Option<SystemTime>,
}

/// CSV-file-backed [`Authenticator`].
///
/// Lock order is always file state before table. The file mutex
/// serializes disk writes and mtime sampling, so an in-flight atomic
/// rewrite can never be mistaken for an external edit by the hot-reload
/// check.
pub struct FileStoreAuthenticator {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    bus: ApplicationBus,
    holidays: HolidayCalendar,
    table: Mutex<UserTable>,
    file: Mutex<FileState>,
}

impl FileStoreAuthenticator {
    pub fn open(
        path: impl Into<PathBuf>,
        bus: ApplicationBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let table = UserTable::load(&path)?;

        let mut counts: HashMap<Level, usize> = HashMap::new();
        for user in table.users() {
            *counts.entry(user.level).or_default() += 1;
        }
        info!(path = %path.display(), users = table.users().count(), "read user file");
        for (level, count) in &counts {
            info!("{level:>14} {count:4}");
        }

        let mtime = file_mtime(&path);
        Ok(FileStoreAuthenticator {
            path,
            clock,
            bus,
            holidays: HolidayCalendar::default(),
            table: Mutex::new(table),
            file: Mutex::new(FileState { mtime }),
        })
    }

    #[must_use]
    pub fn with_holidays(mut self, holidays: HolidayCalendar) -> Self {
        self.holidays = holidays;
        self
    }

    /// Current revision of the table. Advances on every successful
    /// mutation and on hot-reload swaps.
    pub fn revision(&self) -> u64 {
        self.table.lock().unwrap().revision
    }

    /// Snapshot of all live users, freshest file state included.
    pub fn users(&self) -> Vec<User> {
        self.reload_if_changed();
        self.table.lock().unwrap().users().cloned().collect()
    }

    /// If the file changed on disk since we last looked, rebuild the
    /// table from it and swap the result in.
    fn reload_if_changed(&self) {
        let mut file = self.file.lock().unwrap();
        let mtime = file_mtime(&self.path);
        if mtime == file.mtime {
            return;
        }
        match UserTable::load(&self.path) {
            Ok(mut fresh) => {
                let mut table = self.table.lock().unwrap();
                // The swap counts as a mutation: any edit-in-flight must
                // fail its revision fence rather than clobber this state.
                fresh.revision = table.revision + 1;
                info!(path = %self.path.display(), "user file changed on disk, reloaded");
                *table = fresh;
                file.mtime = mtime;
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "user file changed but reload failed");
            }
        }
    }

    fn find_with_revision(&self, plain_code: &str) -> Option<(User, u64, usize)> {
        self.reload_if_changed();
        let table = self.table.lock().unwrap();
        let (slot, user) = table.find(&hash_auth_code(plain_code))?;
        Some((user.clone(), table.revision, slot))
    }

    fn verify_modify_allowed(&self, auth_code: &str) -> Result<(), StoreError> {
        let Some((member, _, _)) = self.find_with_revision(auth_code) else {
            return Err(StoreError::UnknownAuthenticator);
        };
        if !member.level.may_modify_users() {
            return Err(StoreError::NotPrivileged);
        }
        if !member.in_validity_period(self.clock.now()) {
            return Err(StoreError::AuthenticatorExpired);
        }
        Ok(())
    }

    fn level_has_access(&self, user: &User, now: DateTime<Local>) -> (AuthDecision, String) {
        match user.level {
            Level::Member | Level::Philanthropist => (AuthDecision::Ok, String::new()),
            Level::Hiatus => (AuthDecision::Fail, "On hiatus".to_string()),
            Level::Fulltime => {
                if user.in_access_hours(now, &self.holidays) {
                    (AuthDecision::Ok, String::new())
                } else {
                    (
                        AuthDecision::OkOutsideHours,
                        "Fulltime user outside daytime.".to_string(),
                    )
                }
            }
            Level::User => {
                if user.in_access_hours(now, &self.holidays) {
                    (AuthDecision::Ok, String::new())
                } else if self.holidays.is_holiday(now.date_naive()) {
                    (
                        AuthDecision::OkOutsideHours,
                        "Regular user outside holiday hours.".to_string(),
                    )
                } else {
                    (
                        AuthDecision::OkOutsideHours,
                        "Regular user outside daytime.".to_string(),
                    )
                }
            }
        }
    }

    async fn post_user_event(&self, kind: AppEventKind, user_name: &str, auth_code: &str) {
        self.bus
            .post(
                AppEvent::new(kind, Target::new("users"))
                    .source(scrub_log_value(auth_code))
                    .msg(user_name),
            )
            .await;
    }
}

impl Authenticator for FileStoreAuthenticator {
    fn find_user(&self, plain_code: &str) -> Option<User> {
        self.find_with_revision(plain_code).map(|(user, _, _)| user)
    }

    fn auth_user(&self, plain_code: &str, _target: &Target) -> (AuthDecision, String) {
        if !meets_min_code_length(plain_code) {
            return (AuthDecision::Fail, "Auth failed: code too short.".into());
        }
        let Some((user, _, _)) = self.find_with_revision(plain_code) else {
            return (AuthDecision::Fail, "No user for code".into());
        };
        // Be specific about hiatus: this is either a stolen token of
        // someone on leave, or a blocked user trying their luck.
        if user.level == Level::Hiatus {
            return (
                AuthDecision::Fail,
                format!("User on hiatus '{} <{}>'", user.name, user.contact_info),
            );
        }
        let now = self.clock.now();
        if !user.in_validity_period(now) {
            return (AuthDecision::Expired, "Code not valid yet/expired".into());
        }
        self.level_has_access(&user, now)
    }

    async fn add_new_user(&self, auth_code: &str, mut user: User) -> Result<(), StoreError> {
        self.verify_modify_allowed(auth_code)?;

        user.sponsors = vec![hash_auth_code(auth_code)];
        if user.valid_from.is_none() {
            user.valid_from = Some(self.clock.now());
        }
        let name = user.name.clone();

        {
            let mut file = self.file.lock().unwrap();
            let mut table = self.table.lock().unwrap();
            if user.codes.iter().any(|c| table.code_index.contains_key(c)) {
                return Err(StoreError::DuplicateCodes);
            }

            // Appending one row is enough here; only update/delete pay
            // for the full rewrite.
            let out = OpenOptions::new().append(true).open(&self.path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(out);
            writer.write_record(user.to_fields())?;
            writer.flush()?;
            drop(writer);

            file.mtime = file_mtime(&self.path);
            table.revision += 1;
            table.insert(user, None)?;
        }

        self.post_user_event(AppEventKind::UserAdded, &name, auth_code)
            .await;
        Ok(())
    }

    async fn update_user<F>(
        &self,
        auth_code: &str,
        user_code: &str,
        mutate: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut User) -> bool + Send,
    {
        self.verify_modify_allowed(auth_code)?;

        let Some((original, revision, slot)) = self.find_with_revision(user_code) else {
            return Err(StoreError::UnknownUser);
        };

        // The mutator runs without any lock held: it may be slow or call
        // back into the UI. The revision fence below catches whatever
        // happened in the meantime.
        let mut modified = original;
        if !mutate(&mut modified) {
            return Err(StoreError::UpdateAborted);
        }
        let name = modified.name.clone();

        {
            let mut file = self.file.lock().unwrap();
            let mut table = self.table.lock().unwrap();
            if table.revision != revision {
                return Err(StoreError::ChangedWhileEditing);
            }

            // Stage on a copy; the live table is only replaced once the
            // file rewrite went through.
            let mut staged = table.clone();
            staged.remove(slot);
            staged.insert(modified, Some(slot))?;
            staged.revision += 1;

            write_database(&self.path, &staged)?;
            file.mtime = file_mtime(&self.path);
            *table = staged;
        }

        self.post_user_event(AppEventKind::UserUpdated, &name, auth_code)
            .await;
        Ok(())
    }

    async fn delete_user(&self, auth_code: &str, user_code: &str) -> Result<(), StoreError> {
        self.verify_modify_allowed(auth_code)?;

        let Some((user, revision, slot)) = self.find_with_revision(user_code) else {
            return Err(StoreError::UnknownUser);
        };

        {
            let mut file = self.file.lock().unwrap();
            let mut table = self.table.lock().unwrap();
            if table.revision != revision {
                return Err(StoreError::ChangedWhileEditing);
            }

            let mut staged = table.clone();
            staged.remove(slot);
            staged.revision += 1;

            write_database(&self.path, &staged)?;
            file.mtime = file_mtime(&self.path);
            *table = staged;
        }

        self.post_user_event(AppEventKind::UserDeleted, &user.name, auth_code)
            .await;
        Ok(())
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Full-file rewrite: temp file next to the original, flush, rename.
fn write_database(path: &Path, table: &UserTable) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let bytes = table.to_csv_bytes()?;
    let mut out = fs::File::create(&tmp)?;
    out.write_all(&bytes)?;
    out.sync_all()?;
    drop(out);
    fs::rename(&tmp, path)?;
    Ok(())
}
