//! Local accounts.
//!
//! Account model, status classification and the redb-backed repository.

pub mod names;
pub mod store;
pub mod types;

pub use store::{AccountRepository, AccountStore};
pub use types::{classify_status, Account, AccountStatus, PendingRecords, StatusPolicy};
