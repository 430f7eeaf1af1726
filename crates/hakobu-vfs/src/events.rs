//! Notification sink for cache and pruner activity.
//!
//! Components report what they did through an [`EventSink`]. The default
//! [`TracingSink`] turns events into log lines; [`EventBus`] fans them out
//! over a broadcast channel so other tasks can watch.
//!
//! # Subjects
//!
//! Every event has a dot-separated subject (`cache.added`, `prune.removed`).
//! Subscriptions filter with wildcards:
//! - `*` matches exactly one token: `prune.*` matches `prune.removed`
//! - `>` matches one or more trailing tokens: `>` matches everything

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Something a cache or pruner did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VfsEvent {
    /// A resource was copied into a cache.
    CacheAdded { name: String, path: String },
    /// `add` found the name already cached and did nothing.
    CacheHit { name: String, path: String },
    /// A cached entry was removed on request.
    CacheRemoved { name: String, path: String },
    /// A pruner task started.
    PrunerStarted { folder: String },
    /// A pruner task stopped.
    PrunerStopped { folder: String },
    /// A pruner cycle deleted a file.
    FileRemoved { path: String, size: u64 },
    /// A pruner cycle finished.
    CycleCompleted {
        folder: String,
        scanned: usize,
        removed: usize,
        bytes_freed: u64,
    },
    /// A pruner cycle failed; the pruner keeps running.
    CycleFailed { folder: String, error: String },
}

impl VfsEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::CacheAdded { .. } => "cache.added",
            Self::CacheHit { .. } => "cache.hit",
            Self::CacheRemoved { .. } => "cache.removed",
            Self::PrunerStarted { .. } => "prune.started",
            Self::PrunerStopped { .. } => "prune.stopped",
            Self::FileRemoved { .. } => "prune.removed",
            Self::CycleCompleted { .. } => "prune.cycle",
            Self::CycleFailed { .. } => "prune.failed",
        }
    }
}

/// Receives events. Must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: VfsEvent);
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: VfsEvent) {
        match &event {
            VfsEvent::CycleFailed { folder, error } => {
                tracing::warn!(%folder, %error, "prune cycle failed");
            }
            VfsEvent::FileRemoved { path, size } => {
                tracing::info!(%path, size, "pruned file");
            }
            VfsEvent::CycleCompleted {
                folder,
                scanned,
                removed,
                bytes_freed,
            } => {
                tracing::debug!(%folder, scanned, removed, bytes_freed, "prune cycle complete");
            }
            other => tracing::debug!(subject = other.subject(), event = ?other, "vfs event"),
        }
    }
}

/// Shared default sink.
pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

/// Check if a subject matches a pattern.
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.').peekable();
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return pattern.peek().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// An event with its subject and arrival time.
#[derive(Clone, Debug)]
pub struct EventMessage {
    pub subject: &'static str,
    pub event: VfsEvent,
    pub timestamp: Instant,
}

/// Broadcast fan-out of events. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: VfsEvent) -> usize {
        let msg = EventMessage {
            subject: event.subject(),
            event,
            timestamp: Instant::now(),
        };
        self.tx.send(msg).unwrap_or(0)
    }

    pub fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBus {
    fn notify(&self, event: VfsEvent) {
        self.publish(event);
    }
}

/// A filtered view of an [`EventBus`].
pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<EventMessage>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching event, or `None` once every bus handle is dropped.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if matches_pattern(&self.pattern, msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "event subscription lagged behind");
                }
                Err(_) => return None,
            }
        }
    }
}
