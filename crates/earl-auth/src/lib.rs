//! User store and authentication policy for the access daemon.
//!
//! The store is a CSV file of hashed credentials; see
//! [`FileStoreAuthenticator`] for its concurrency and persistence model
//! and [`User`] for the record format and the access-hours policy.

pub mod authenticator;
pub mod hours;
pub mod user;

pub use authenticator::{Authenticator, FileStoreAuthenticator, StoreError};
pub use hours::HolidayCalendar;
pub use user::User;
