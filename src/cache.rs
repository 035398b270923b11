//! Short-lived response cache keyed by query fingerprint.
//!
//! The fingerprint is a 64-bit hash of the textual form of the first question
//! (name, class, type). Messages without a question are never cached. Entries
//! bound age, not count: anything older than 60 seconds is eligible for the
//! sweep, there is no LRU and no size limit.

use dashmap::DashMap;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use rustc_hash::{FxBuildHasher, FxHasher};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum entry age before the sweep removes it. An entry aged exactly this
/// long survives; one second older does not.
const MAX_AGE_SECS: i64 = 60;

/// Interval of the background sweep task.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Cache key derived from a message's first question.
pub type Fingerprint = u64;

/// Hash of the first question of `message`, or `None` when the message
/// carries no question (such messages are never cached).
pub fn fingerprint(message: &Message) -> Option<Fingerprint> {
    let question = message.queries().first()?;
    let text = format!(
        "{} {} {}",
        question.name(),
        question.query_class(),
        question.query_type()
    );

    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    Some(hasher.finish())
}

struct CacheEntry {
    #[allow(dead_code)]
    message: Message,
    answers: Vec<Record>,
    last_seen: i64,
}

/// Bounded-lifetime mapping from query fingerprint to a previously observed
/// answer set. Entries own value copies of the records handed to [`add`];
/// nothing aliases caller state after insertion.
///
/// [`add`]: MessageCache::add
pub struct MessageCache {
    entries: Arc<DashMap<Fingerprint, CacheEntry, FxBuildHasher>>,
    sweeper: Option<CancellationToken>,
}

impl MessageCache {
    /// Cache without a background sweep; callers drive [`clean`] themselves.
    ///
    /// [`clean`]: MessageCache::clean
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(FxBuildHasher::default())),
            sweeper: None,
        }
    }

    /// Cache with a repeating background sweep that removes expired entries
    /// every 30 seconds until the cache is dropped or shut down. Must be
    /// called within a Tokio runtime.
    pub fn with_sweeper() -> Self {
        let mut cache = Self::new();
        let token = CancellationToken::new();

        let entries = Arc::clone(&cache.entries);
        let shutdown = token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("cache sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = sweep(&entries, unix_now());
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                }
            }
        });

        cache.sweeper = Some(token);
        cache
    }

    /// Insert the answer set for `message`, replacing any previous entry with
    /// the same fingerprint. No-op for messages without a question.
    pub fn add(&self, message: &Message, answers: &[Record]) {
        let Some(fingerprint) = fingerprint(message) else {
            return;
        };

        self.entries.insert(
            fingerprint,
            CacheEntry {
                message: message.clone(),
                answers: answers.to_vec(),
                last_seen: unix_now(),
            },
        );
    }

    /// Cached answers for `message`, if present. Always a miss for messages
    /// without a question.
    pub fn get(&self, message: &Message) -> Option<Vec<Record>> {
        let fingerprint = fingerprint(message)?;
        self.entries
            .get(&fingerprint)
            .map(|entry| entry.answers.clone())
    }

    /// Refresh the last-seen timestamp of an entry.
    pub fn update(&self, fingerprint: Fingerprint) {
        if let Some(mut entry) = self.entries.get_mut(&fingerprint) {
            entry.last_seen = unix_now();
        }
    }

    /// Drop a single entry.
    pub fn remove(&self, fingerprint: Fingerprint) {
        self.entries.remove(&fingerprint);
    }

    /// Single cleanup pass: delete every entry older than 60 seconds.
    pub fn clean(&self) {
        sweep(&self.entries, unix_now());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop the background sweep, if one is running.
    pub fn shutdown(&self) {
        if let Some(token) = &self.sweeper {
            token.cancel();
        }
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MessageCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep(
    entries: &DashMap<Fingerprint, CacheEntry, FxBuildHasher>,
    now: i64,
) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now - entry.last_seen <= MAX_AGE_SECS);
    before - entries.len()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
