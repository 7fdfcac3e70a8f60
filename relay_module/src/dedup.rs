//! Time-windowed suppression of repeated inbound messages.
//!
//! LINE delivers webhooks at least once and users double-tap send, so every
//! accepted event marks one or more identity keys. Any later event producing a
//! live key is skipped until the entry ages out of the window.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::line_event::InboundEvent;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which identity keys an event contributes to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupKeyStrategy {
    /// Platform-issued event id (or `userId:timestamp` when absent).
    EventId,
    /// Hash of the sender and whitespace-normalized text.
    Content,
    /// Both keys; either one being live suppresses the event.
    #[default]
    EventAndContent,
}

impl FromStr for DedupKeyStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "event_id" | "event" => Ok(Self::EventId),
            "content" => Ok(Self::Content),
            "event_and_content" | "both" => Ok(Self::EventAndContent),
            other => Err(format!("unknown dedup key strategy: {}", other)),
        }
    }
}

impl fmt::Display for DedupKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventId => "event_id",
            Self::Content => "content",
            Self::EventAndContent => "event_and_content",
        };
        f.write_str(name)
    }
}

pub fn derive_dedup_keys(strategy: DedupKeyStrategy, event: &InboundEvent) -> Vec<String> {
    let event_key = || match event.event_id.as_deref() {
        Some(id) => format!("event:{}", id),
        None => format!("event:{}:{}", event.source_user_id, event.timestamp),
    };
    let content_key = || {
        let material = format!(
            "{}\n{}",
            event.source_user_id,
            normalize_text(&event.message_text)
        );
        format!("content:{:x}", md5::compute(material.as_bytes()))
    };

    match strategy {
        DedupKeyStrategy::EventId => vec![event_key()],
        DedupKeyStrategy::Content => vec![content_key()],
        DedupKeyStrategy::EventAndContent => vec![event_key(), content_key()],
    }
}

/// Trims and collapses internal whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared suppression state. Implementations must make `try_mark` atomic so
/// concurrent deliveries of the same event cannot both pass.
pub trait DedupStore: Send + Sync {
    fn should_process(&self, key: &str) -> bool;
    fn mark_processed(&self, key: &str);
    /// Marks every key and returns true only if none of them was live.
    fn try_mark(&self, keys: &[String]) -> bool;
    fn release(&self, keys: &[String]);
    /// Drops expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
    fn len(&self) -> usize;
    /// Drops every entry, returning the prior size.
    fn clear(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store for single-instance deployments.
pub struct InMemoryDedupStore {
    window: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryDedupStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) < self.window
    }

    fn should_process_at(&self, key: &str, now: Instant) -> bool {
        match self.entries().get(key) {
            Some(inserted_at) => !self.is_live(*inserted_at, now),
            None => true,
        }
    }

    fn try_mark_at(&self, keys: &[String], now: Instant) -> bool {
        let mut entries = self.entries();
        let duplicate = keys.iter().any(|key| {
            entries
                .get(key)
                .is_some_and(|inserted_at| self.is_live(*inserted_at, now))
        });
        if duplicate {
            return false;
        }
        for key in keys {
            entries.insert(key.clone(), now);
        }
        true
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, inserted_at| self.is_live(*inserted_at, now));
        before - entries.len()
    }
}

impl Default for InMemoryDedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl DedupStore for InMemoryDedupStore {
    fn should_process(&self, key: &str) -> bool {
        self.should_process_at(key, Instant::now())
    }

    fn mark_processed(&self, key: &str) {
        self.entries().insert(key.to_string(), Instant::now());
    }

    fn try_mark(&self, keys: &[String]) -> bool {
        self.try_mark_at(keys, Instant::now())
    }

    fn release(&self, keys: &[String]) {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(key);
        }
    }

    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn clear(&self) -> usize {
        let mut entries = self.entries();
        let previous = entries.len();
        entries.clear();
        previous
    }
}

/// Periodically sweeps expired entries. Runs until the handle is aborted.
pub fn spawn_dedup_sweeper(store: Arc<dyn DedupStore>, every: Duration) -> JoinHandle<()> {
    info!("dedup sweeper started (interval={:?})", every);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!("dedup sweep removed {} entries ({} remain)", removed, store.len());
            }
        }
    })
}
