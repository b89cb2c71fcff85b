//! Per-file debounce scheduler
//!
//! Coalesces bursts of edit events for one file into a single delayed
//! analysis trigger. Each file key holds at most one pending entry with a
//! generation counter:
//!
//! - scheduling a key that is already pending replaces the payload and
//!   resets the deadline (the generation is bumped)
//! - a timer whose generation no longer matches when it reaches the hub
//!   fires into nothing
//! - cancel removes the entry, so any in-flight timer for it is stale
//!
//! Timers are plain spawned sleeps that report back through a channel the
//! hub actor selects on, so fires and resets are serialized on the same
//! task and a fire can never race a concurrent reset for the same key.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::hub::subscriptions::FileId;

/// Timer expiry notification, delivered to the hub actor's select loop
#[derive(Debug, Clone)]
pub struct DebounceFire {
    pub file_id: FileId,
    pub generation: u64,
}

/// A pending coalesced analysis for one file
#[derive(Debug, Clone)]
pub struct PendingAnalysis {
    pub file_id: FileId,
    pub language: String,
    /// Most recent edit payload; earlier payloads in the burst are discarded
    pub payload: serde_json::Value,
    pub generation: u64,
}

/// Coalescing timer map keyed by file id
pub struct DebounceScheduler {
    pending: HashMap<FileId, PendingAnalysis>,
    fire_tx: mpsc::UnboundedSender<DebounceFire>,
    next_generation: u64,
}

impl DebounceScheduler {
    /// Create a scheduler that reports expiries on the given channel
    pub fn new(fire_tx: mpsc::UnboundedSender<DebounceFire>) -> Self {
        Self {
            pending: HashMap::new(),
            fire_tx,
            next_generation: 0,
        }
    }

    /// Schedule (or reset) the timer for a file. The new payload replaces any
    /// pending one and the deadline moves to `now + interval`.
    pub fn schedule(
        &mut self,
        file_id: &str,
        language: &str,
        payload: serde_json::Value,
        interval: Duration,
    ) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;

        self.pending.insert(
            file_id.to_string(),
            PendingAnalysis {
                file_id: file_id.to_string(),
                language: language.to_string(),
                payload,
                generation,
            },
        );

        let fire_tx = self.fire_tx.clone();
        let file_id = file_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // Receiver gone means the hub shut down; nothing to do
            let _ = fire_tx.send(DebounceFire {
                file_id,
                generation,
            });
        });

        generation
    }

    /// Claim the pending entry for a fire notification. Returns `None` when
    /// the fire lost a race against a reset or cancel, which guarantees at
    /// most one fire per scheduling generation.
    pub fn take_if_current(&mut self, file_id: &str, generation: u64) -> Option<PendingAnalysis> {
        match self.pending.get(file_id) {
            Some(entry) if entry.generation == generation => self.pending.remove(file_id),
            _ => None,
        }
    }

    /// Remove a pending timer without firing it. A no-op for unknown keys.
    pub fn cancel(&mut self, file_id: &str) -> bool {
        self.pending.remove(file_id).is_some()
    }

    /// Drop every pending timer (used during shutdown)
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn is_pending(&self, file_id: &str) -> bool {
        self.pending.contains_key(file_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_single_fire_after_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = DebounceScheduler::new(tx);

        let generation = sched.schedule("f.ts", "typescript", json!(1), Duration::from_millis(300));
        assert!(sched.is_pending("f.ts"));

        let fire = rx.recv().await.unwrap();
        assert_eq!(fire.file_id, "f.ts");
        assert_eq!(fire.generation, generation);

        let pending = sched.take_if_current("f.ts", fire.generation).unwrap();
        assert_eq!(pending.payload, json!(1));
        assert!(!sched.is_pending("f.ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_supersedes_earlier_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = DebounceScheduler::new(tx);

        sched.schedule("f.ts", "typescript", json!(1), Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sched.schedule("f.ts", "typescript", json!(2), Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let last = sched.schedule("f.ts", "typescript", json!(3), Duration::from_millis(300));

        // All three timers eventually report; only the last one claims
        let mut claimed = Vec::new();
        for _ in 0..3 {
            let fire = rx.recv().await.unwrap();
            if let Some(pending) = sched.take_if_current(&fire.file_id, fire.generation) {
                claimed.push(pending);
            }
        }
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].generation, last);
        assert_eq!(claimed[0].payload, json!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline_suppresses_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = DebounceScheduler::new(tx);

        sched.schedule("f.ts", "typescript", json!(1), Duration::from_millis(300));
        assert!(sched.cancel("f.ts"));
        assert!(!sched.cancel("f.ts"));

        let fire = rx.recv().await.unwrap();
        assert!(sched.take_if_current(&fire.file_id, fire.generation).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_keys_fire_independently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = DebounceScheduler::new(tx);

        sched.schedule("a.ts", "typescript", json!("a"), Duration::from_millis(100));
        sched.schedule("b.rs", "rust", json!("b"), Duration::from_millis(200));
        assert_eq!(sched.pending_count(), 2);

        let mut files = Vec::new();
        for _ in 0..2 {
            let fire = rx.recv().await.unwrap();
            if let Some(p) = sched.take_if_current(&fire.file_id, fire.generation) {
                files.push(p.file_id);
            }
        }
        files.sort();
        assert_eq!(files, vec!["a.ts", "b.rs"]);
    }
}
