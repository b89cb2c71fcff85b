//! Subscription registry
//!
//! Tracks which connections are interested in which files and with what
//! options. A subscription is unique per (connection, file): a second
//! subscribe for the same pair updates the options in place instead of
//! stacking a duplicate, so fan-out never double-delivers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hub::connections::ConnectionId;

pub type SubscriptionId = String;
pub type FileId = String;

/// Per-subscription options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionOptions {
    pub include_relationships: bool,
    pub include_patterns: bool,
    /// Requested debounce window in milliseconds; the effective window for a
    /// file is the minimum across its subscribers
    pub debounce_ms: Option<u64>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            include_relationships: true,
            include_patterns: false,
            debounce_ms: None,
        }
    }
}

/// One client's interest in live updates for one file
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub connection_id: ConnectionId,
    pub file_id: FileId,
    pub language: String,
    pub options: SubscriptionOptions,
}

/// Outcome of a subscribe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    /// An existing (connection, file) subscription had its options updated
    Updated,
}

/// Registry of all live subscriptions, indexed by file and by connection
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    by_file: HashMap<FileId, HashSet<SubscriptionId>>,
    by_connection: HashMap<ConnectionId, HashSet<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a file. Deduped per (connection, file):
    /// re-subscribing updates language and options and returns the existing id.
    pub fn subscribe(
        &mut self,
        connection_id: &ConnectionId,
        file_id: &str,
        language: &str,
        options: SubscriptionOptions,
    ) -> (SubscriptionId, SubscribeOutcome) {
        if let Some(existing) = self.find_for(connection_id, file_id) {
            if let Some(sub) = self.subscriptions.get_mut(&existing) {
                sub.language = language.to_string();
                sub.options = options;
            }
            return (existing, SubscribeOutcome::Updated);
        }

        let id = format!(
            "sub_{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );
        let sub = Subscription {
            id: id.clone(),
            connection_id: connection_id.clone(),
            file_id: file_id.to_string(),
            language: language.to_string(),
            options,
        };

        self.by_file
            .entry(sub.file_id.clone())
            .or_default()
            .insert(id.clone());
        self.by_connection
            .entry(sub.connection_id.clone())
            .or_default()
            .insert(id.clone());
        self.subscriptions.insert(id.clone(), sub);

        (id, SubscribeOutcome::Created)
    }

    /// Remove a subscription by id
    pub fn unsubscribe(&mut self, subscription_id: &str) -> Option<Subscription> {
        let sub = self.subscriptions.remove(subscription_id)?;
        self.unlink(&sub);
        Some(sub)
    }

    /// Remove every subscription owned by a connection, returning them
    pub fn remove_connection(&mut self, connection_id: &ConnectionId) -> Vec<Subscription> {
        let ids: Vec<SubscriptionId> = self
            .by_connection
            .remove(connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sub) = self.subscriptions.remove(&id) {
                if let Some(set) = self.by_file.get_mut(&sub.file_id) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_file.remove(&sub.file_id);
                    }
                }
                removed.push(sub);
            }
        }
        removed
    }

    /// Connections holding an active subscription to a file
    pub fn subscribers_of(&self, file_id: &str) -> Vec<ConnectionId> {
        self.by_file
            .get(file_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.subscriptions.get(id))
                    .map(|sub| sub.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscription ids owned by a connection
    pub fn subscriptions_of(&self, connection_id: &ConnectionId) -> Vec<SubscriptionId> {
        self.by_connection
            .get(connection_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any subscription targets the file
    pub fn has_subscribers(&self, file_id: &str) -> bool {
        self.by_file.get(file_id).is_some_and(|s| !s.is_empty())
    }

    /// Effective debounce window for a file: the minimum interval across its
    /// subscribers, so the most latency-sensitive one governs. A subscriber
    /// without an explicit interval counts at the default.
    pub fn min_debounce_for(&self, file_id: &str, default: Duration) -> Duration {
        self.by_file
            .get(file_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.subscriptions.get(id))
            .map(|sub| {
                sub.options
                    .debounce_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default)
            })
            .min()
            .unwrap_or(default)
    }

    pub fn get(&self, subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions.get(subscription_id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn find_for(&self, connection_id: &ConnectionId, file_id: &str) -> Option<SubscriptionId> {
        self.by_connection
            .get(connection_id)?
            .iter()
            .find(|id| {
                self.subscriptions
                    .get(*id)
                    .is_some_and(|sub| sub.file_id == file_id)
            })
            .cloned()
    }

    fn unlink(&mut self, sub: &Subscription) {
        if let Some(set) = self.by_file.get_mut(&sub.file_id) {
            set.remove(&sub.id);
            if set.is_empty() {
                self.by_file.remove(&sub.file_id);
            }
        }
        if let Some(set) = self.by_connection.get_mut(&sub.connection_id) {
            set.remove(&sub.id);
            if set.is_empty() {
                self.by_connection.remove(&sub.connection_id);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: usize) -> ConnectionId {
        format!("conn_{}", n)
    }

    #[test]
    fn test_subscribers_match_active_subscriptions() {
        let mut reg = SubscriptionRegistry::new();
        let (s1, _) = reg.subscribe(&conn(1), "f.ts", "typescript", Default::default());
        let (_s2, _) = reg.subscribe(&conn(2), "f.ts", "typescript", Default::default());
        let (_s3, _) = reg.subscribe(&conn(1), "g.ts", "typescript", Default::default());

        let mut subs = reg.subscribers_of("f.ts");
        subs.sort();
        assert_eq!(subs, vec![conn(1), conn(2)]);
        assert_eq!(reg.subscribers_of("g.ts"), vec![conn(1)]);

        reg.unsubscribe(&s1);
        assert_eq!(reg.subscribers_of("f.ts"), vec![conn(2)]);
        assert_eq!(reg.subscriptions_of(&conn(1)).len(), 1);
    }

    #[test]
    fn test_resubscribe_updates_instead_of_duplicating() {
        let mut reg = SubscriptionRegistry::new();
        let (first, outcome) = reg.subscribe(&conn(1), "f.ts", "typescript", Default::default());
        assert_eq!(outcome, SubscribeOutcome::Created);

        let options = SubscriptionOptions {
            debounce_ms: Some(100),
            ..Default::default()
        };
        let (second, outcome) = reg.subscribe(&conn(1), "f.ts", "typescript", options);
        assert_eq!(outcome, SubscribeOutcome::Updated);
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&first).unwrap().options.debounce_ms, Some(100));
    }

    #[test]
    fn test_remove_connection_cleans_all_indexes() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(&conn(1), "f.ts", "typescript", Default::default());
        reg.subscribe(&conn(1), "g.ts", "typescript", Default::default());
        reg.subscribe(&conn(2), "f.ts", "typescript", Default::default());

        let removed = reg.remove_connection(&conn(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(reg.subscribers_of("f.ts"), vec![conn(2)]);
        assert!(!reg.has_subscribers("g.ts"));
        assert!(reg.subscriptions_of(&conn(1)).is_empty());

        // Idempotent on a connection with nothing left
        assert!(reg.remove_connection(&conn(1)).is_empty());
    }

    #[test]
    fn test_min_debounce_takes_most_latency_sensitive() {
        let mut reg = SubscriptionRegistry::new();
        let default = Duration::from_millis(300);
        assert_eq!(reg.min_debounce_for("f.ts", default), default);

        reg.subscribe(
            &conn(1),
            "f.ts",
            "typescript",
            SubscriptionOptions {
                debounce_ms: Some(500),
                ..Default::default()
            },
        );
        assert_eq!(
            reg.min_debounce_for("f.ts", default),
            Duration::from_millis(500)
        );

        reg.subscribe(
            &conn(2),
            "f.ts",
            "typescript",
            SubscriptionOptions {
                debounce_ms: Some(50),
                ..Default::default()
            },
        );
        assert_eq!(
            reg.min_debounce_for("f.ts", default),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_unset_debounce_counts_at_default() {
        let mut reg = SubscriptionRegistry::new();
        let default = Duration::from_millis(300);

        // One subscriber at the implicit default, one asking for more slack:
        // the implicit subscriber still governs.
        reg.subscribe(&conn(1), "f.ts", "typescript", Default::default());
        reg.subscribe(
            &conn(2),
            "f.ts",
            "typescript",
            SubscriptionOptions {
                debounce_ms: Some(500),
                ..Default::default()
            },
        );
        assert_eq!(reg.min_debounce_for("f.ts", default), default);
    }
}
