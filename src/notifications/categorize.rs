//! Subscriber categorization when a file or folder moves between projects.
//!
//! Every subscriber of the source event ends up in exactly one bin per
//! notification type: moved along with the subscription, warned that they
//! will stop receiving notifications, or removed because they lost access.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a subscriber wants to be notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    EmailTransactional,
    EmailDigest,
    None,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [
        NotificationType::EmailTransactional,
        NotificationType::EmailDigest,
        NotificationType::None,
    ];

    /// Types that actually send mail.
    pub fn is_delivered(self) -> bool {
        !matches!(self, NotificationType::None)
    }
}

/// Subscriber ids per notification type.
pub type Subscriptions = BTreeMap<NotificationType, BTreeSet<String>>;

/// Output bins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorized {
    pub moved: Subscriptions,
    pub warned: Subscriptions,
    pub removed: Subscriptions,
}

fn bucket(subs: &Subscriptions, kind: NotificationType) -> BTreeSet<String> {
    subs.get(&kind).cloned().unwrap_or_default()
}

/// Sort subscribers of a moved event into moved, warned and removed.
///
/// `source_subs` are the subscribers at the source, `new_subs` those already
/// subscribed at the destination, `removed` the users dropped while moving the
/// subscription itself. `has_access` tells whether a user can see the
/// destination. The initiator never appears in the result.
pub fn categorize_users<F>(
    initiator: &str,
    source_subs: &Subscriptions,
    new_subs: &Subscriptions,
    removed: &Subscriptions,
    has_access: F,
) -> Categorized
where
    F: Fn(&str) -> bool,
{
    let delivered: Vec<NotificationType> = NotificationType::ALL
        .into_iter()
        .filter(|t| t.is_delivered())
        .collect();

    let mut moved = Subscriptions::new();
    let mut warned = Subscriptions::new();
    let mut remove = Subscriptions::new();

    for kind in NotificationType::ALL {
        moved.insert(kind, BTreeSet::new());
        warned.insert(kind, BTreeSet::new());
        remove.insert(kind, bucket(removed, kind));
    }

    for &kind in &delivered {
        let source = bucket(source_subs, kind);
        let target = bucket(new_subs, kind);

        moved.insert(kind, source.union(&target).cloned().collect());

        let (keep, lost): (BTreeSet<String>, BTreeSet<String>) = source
            .difference(&target)
            .cloned()
            .partition(|user| has_access(user));
        warned.insert(kind, keep);
        remove.entry(kind).or_default().extend(lost);
    }

    // A user subscribed at the destination under another type is neither
    // warned nor moved under this one
    for &kind in &delivered {
        for &other in &delivered {
            if other == kind {
                continue;
            }
            let other_new = bucket(new_subs, other);
            if let Some(set) = warned.get_mut(&kind) {
                set.retain(|user| !other_new.contains(user));
            }
            if let Some(set) = moved.get_mut(&kind) {
                set.retain(|user| !other_new.contains(user));
            }
        }
    }

    for &kind in &delivered {
        let mut excluded = BTreeSet::new();
        for &other in &delivered {
            excluded.extend(warned[&other].iter().cloned());
            excluded.extend(remove[&other].iter().cloned());
        }
        if let Some(set) = moved.get_mut(&kind) {
            set.retain(|user| !excluded.contains(user));
        }

        for bins in [&mut warned, &mut moved, &mut remove] {
            if let Some(set) = bins.get_mut(&kind) {
                set.remove(initiator);
            }
        }
    }

    Categorized {
        moved,
        warned,
        removed: remove,
    }
}

/// Operator input for [`categorize_users`].
#[derive(Debug, Clone, Deserialize)]
pub struct CategorizeRequest {
    pub initiator: String,
    #[serde(default)]
    pub source: Subscriptions,
    #[serde(default)]
    pub destination: Subscriptions,
    #[serde(default)]
    pub removed: Subscriptions,
    /// Users who can see the destination.
    #[serde(default)]
    pub with_access: BTreeSet<String>,
}

impl CategorizeRequest {
    pub fn categorize(&self) -> Categorized {
        categorize_users(
            &self.initiator,
            &self.source,
            &self.destination,
            &self.removed,
            |user| self.with_access.contains(user),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use NotificationType::{EmailDigest, EmailTransactional};

    fn subs(entries: &[(NotificationType, &[&str])]) -> Subscriptions {
        entries
            .iter()
            .map(|(kind, users)| (*kind, users.iter().map(|u| u.to_string()).collect()))
            .collect()
    }

    fn users(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_basic_bins() {
        let source = subs(&[(EmailTransactional, &["alice", "bob", "carol"])]);
        let target = subs(&[(EmailTransactional, &["alice", "dave"])]);
        let removed = Subscriptions::new();

        let result = categorize_users("zed", &source, &target, &removed, |u| u != "carol");

        // bob is subscribed at the source only and can see the destination
        assert_eq!(users(&result.warned[&EmailTransactional]), vec!["bob"]);
        // carol lost access
        assert_eq!(users(&result.removed[&EmailTransactional]), vec!["carol"]);
        // moved excludes warned and removed users
        assert_eq!(users(&result.moved[&EmailTransactional]), vec!["alice", "dave"]);
    }

    #[test]
    fn test_initiator_excluded_everywhere() {
        let source = subs(&[(EmailTransactional, &["me", "bob"]), (EmailDigest, &["me"])]);
        let target = subs(&[(EmailTransactional, &["me"])]);
        let removed = subs(&[(EmailDigest, &["me"])]);

        let result = categorize_users("me", &source, &target, &removed, |_| true);

        for kind in [EmailTransactional, EmailDigest] {
            assert!(!result.moved[&kind].contains("me"));
            assert!(!result.warned[&kind].contains("me"));
            assert!(!result.removed[&kind].contains("me"));
        }
        assert_eq!(users(&result.warned[&EmailTransactional]), vec!["bob"]);
    }

    #[test]
    fn test_other_type_subscription_at_destination_wins() {
        // alice gets transactional mail at the source but digests at the destination
        let source = subs(&[(EmailTransactional, &["alice"])]);
        let target = subs(&[(EmailDigest, &["alice"])]);
        let removed = Subscriptions::new();

        let result = categorize_users("zed", &source, &target, &removed, |_| true);

        assert!(result.warned[&EmailTransactional].is_empty());
        assert!(result.moved[&EmailTransactional].is_empty());
        assert_eq!(users(&result.moved[&EmailDigest]), vec!["alice"]);
    }

    #[test]
    fn test_moved_and_warned_disjoint_across_types() {
        let source = subs(&[
            (EmailTransactional, &["a", "b", "c"]),
            (EmailDigest, &["d", "e"]),
        ]);
        let target = subs(&[(EmailTransactional, &["a"]), (EmailDigest, &["e", "f"])]);
        let removed = subs(&[(EmailTransactional, &["g"])]);

        let result = categorize_users("zed", &source, &target, &removed, |u| u != "c");

        let all_warned: BTreeSet<&String> = result.warned.values().flatten().collect();
        let all_removed: BTreeSet<&String> = result.removed.values().flatten().collect();
        for set in result.moved.values() {
            for user in set {
                assert!(!all_warned.contains(user), "{} moved and warned", user);
                assert!(!all_removed.contains(user), "{} moved and removed", user);
            }
        }
        assert_eq!(
            users(&result.removed[&EmailTransactional]),
            vec!["c", "g"]
        );
    }

    #[test]
    fn test_none_type_passed_through() {
        let source = subs(&[(NotificationType::None, &["quiet"])]);
        let target = Subscriptions::new();
        let removed = subs(&[(NotificationType::None, &["gone"])]);

        let result = categorize_users("zed", &source, &target, &removed, |_| true);

        assert!(result.moved[&NotificationType::None].is_empty());
        assert!(result.warned[&NotificationType::None].is_empty());
        assert_eq!(users(&result.removed[&NotificationType::None]), vec!["gone"]);
    }

    #[test]
    fn test_request_from_json() {
        let request: CategorizeRequest = serde_json::from_str(
            r#"{
                "initiator": "zed",
                "source": {"email_transactional": ["bob", "carol", "zed"]},
                "destination": {"email_digest": ["erin"]},
                "with_access": ["bob"]
            }"#,
        )
        .unwrap();

        let result = request.categorize();
        assert_eq!(users(&result.warned[&EmailTransactional]), vec!["bob"]);
        assert_eq!(users(&result.removed[&EmailTransactional]), vec!["carol"]);
        assert_eq!(users(&result.moved[&EmailDigest]), vec!["erin"]);
    }
}
