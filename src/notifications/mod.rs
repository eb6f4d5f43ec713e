//! Notification subscription helpers.

pub mod categorize;

pub use categorize::{categorize_users, CategorizeRequest, Categorized, NotificationType, Subscriptions};
