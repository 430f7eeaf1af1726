//! Background eviction for a folder.
//!
//! A [`FolderPruner`] periodically scans the files below a folder and
//! deletes the oldest ones while the folder is over its byte capacity or
//! the volume is short of free space.
//!
//! ## Cycle
//!
//! 1. Collect nested files accepted by the matcher and sort them oldest
//!    first (by modification time, ties broken by path).
//! 2. Sum their sizes.
//! 3. Walk the list in order. A file is removed when there is pressure
//!    (usable space below the minimum, or the running total above
//!    capacity), it is at least `minimum_age` old, and the
//!    [`RemovalPolicy`] agrees. Removal subtracts its size from the
//!    running total. The walk never stops early.
//!
//! Policy fields can be changed from any thread while the pruner runs.
//! Each cycle reads every field once. Cycle failures are reported to the
//! event sink and never stop the pruner.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PrunerConfig;
use crate::error::{VfsError, VfsResult};
use crate::events::{tracing_sink, EventSink, VfsEvent};
use crate::handle::{FileHandle, FolderHandle};
use crate::matcher::Matcher;
use crate::types::Percent;

/// Final say on whether a file may be pruned.
pub trait RemovalPolicy: Send + Sync {
    /// `matched` is every file the current cycle considered, oldest first.
    fn can_remove(&self, file: &FileHandle, matched: &[FileHandle]) -> bool;
}

/// Allows every removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRemove;

impl RemovalPolicy for AlwaysRemove {
    fn can_remove(&self, _file: &FileHandle, _matched: &[FileHandle]) -> bool {
        true
    }
}

impl<F> RemovalPolicy for F
where
    F: Fn(&FileHandle, &[FileHandle]) -> bool + Send + Sync,
{
    fn can_remove(&self, file: &FileHandle, matched: &[FileHandle]) -> bool {
        self(file, matched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunerState {
    Stopped,
    Running,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Files matched and considered.
    pub scanned: usize,
    /// Files deleted, oldest first.
    pub removed: Vec<FileHandle>,
    pub bytes_freed: u64,
    /// Size of the matched files still present.
    pub remaining_bytes: u64,
}

/// Independently lockable policy fields.
struct Policy {
    matcher: RwLock<Matcher>,
    minimum_age: RwLock<Duration>,
    minimum_usable: RwLock<Percent>,
    /// `None` is unbounded.
    capacity: RwLock<Option<u64>>,
    frequency: RwLock<Duration>,
    removal: RwLock<Arc<dyn RemovalPolicy>>,
}

struct Shared {
    folder: FolderHandle,
    policy: Policy,
    sink: Arc<dyn EventSink>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic pruning of one folder. See the [module docs](self).
pub struct FolderPruner {
    shared: Arc<Shared>,
    task: Mutex<Option<Running>>,
}

impl std::fmt::Debug for FolderPruner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderPruner")
            .field("folder", &self.shared.folder)
            .field("state", &self.state())
            .finish()
    }
}

impl FolderPruner {
    /// A stopped pruner with default policy: visible files, 15% minimum
    /// usable space, no capacity limit, no minimum age, 30 second period.
    pub fn new(folder: FolderHandle) -> Self {
        Self::with_sink(folder, tracing_sink())
    }

    pub fn with_sink(folder: FolderHandle, sink: Arc<dyn EventSink>) -> Self {
        let defaults = PrunerConfig::default();
        let policy = Policy {
            matcher: RwLock::new(Matcher::visible()),
            minimum_age: RwLock::new(defaults.minimum_age()),
            minimum_usable: RwLock::new(defaults.minimum_usable()),
            capacity: RwLock::new(defaults.capacity_bytes),
            frequency: RwLock::new(defaults.frequency()),
            removal: RwLock::new(Arc::new(AlwaysRemove)),
        };
        Self {
            shared: Arc::new(Shared { folder, policy, sink }),
            task: Mutex::new(None),
        }
    }

    /// A stopped pruner configured from `config`.
    pub fn from_config(folder: FolderHandle, config: &PrunerConfig) -> VfsResult<Self> {
        let pruner = Self::new(folder);
        pruner.apply_config(config)?;
        Ok(pruner)
    }

    /// Replace every policy field from `config`. Takes effect next cycle.
    pub fn apply_config(&self, config: &PrunerConfig) -> VfsResult<()> {
        config.validate()?;
        self.set_matcher(config.matcher()?);
        self.set_minimum_age(config.minimum_age());
        self.set_minimum_usable_fraction(config.minimum_usable());
        self.set_capacity(config.capacity_bytes);
        self.set_frequency(config.frequency());
        Ok(())
    }

    pub fn folder(&self) -> &FolderHandle {
        &self.shared.folder
    }

    // ========================================================================
    // Policy
    // ========================================================================

    pub fn set_matcher(&self, matcher: Matcher) {
        *self.shared.policy.matcher.write() = matcher;
    }

    pub fn matcher(&self) -> Matcher {
        self.shared.policy.matcher.read().clone()
    }

    pub fn set_minimum_age(&self, age: Duration) {
        *self.shared.policy.minimum_age.write() = age;
    }

    pub fn minimum_age(&self) -> Duration {
        *self.shared.policy.minimum_age.read()
    }

    pub fn set_minimum_usable_fraction(&self, fraction: Percent) {
        *self.shared.policy.minimum_usable.write() = fraction;
    }

    pub fn minimum_usable_fraction(&self) -> Percent {
        *self.shared.policy.minimum_usable.read()
    }

    /// Byte ceiling for the matched files; `None` removes the limit.
    pub fn set_capacity(&self, capacity: Option<u64>) {
        *self.shared.policy.capacity.write() = capacity;
    }

    pub fn capacity(&self) -> Option<u64> {
        *self.shared.policy.capacity.read()
    }

    /// Interval between cycles. Picked up after the current wait.
    pub fn set_frequency(&self, frequency: Duration) {
        *self.shared.policy.frequency.write() = frequency;
    }

    pub fn frequency(&self) -> Duration {
        *self.shared.policy.frequency.read()
    }

    pub fn set_removal_policy(&self, policy: impl RemovalPolicy + 'static) {
        *self.shared.policy.removal.write() = Arc::new(policy);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn state(&self) -> PrunerState {
        match &*self.task.lock() {
            Some(running) if !running.handle.is_finished() => PrunerState::Running,
            _ => PrunerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PrunerState::Running
    }

    /// Spawn the pruning task. Returns `false` if it is already running.
    ///
    /// The first cycle runs immediately. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let folder = shared.folder.to_string();
            shared.sink.notify(VfsEvent::PrunerStarted {
                folder: folder.clone(),
            });
            while !token.is_cancelled() {
                // A started cycle always runs to completion
                shared.guarded_cycle().await;

                let frequency = *shared.policy.frequency.read();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(frequency) => {}
                }
            }
            shared.sink.notify(VfsEvent::PrunerStopped { folder });
        });

        tracing::info!(folder = %self.shared.folder, "pruner started");
        *task = Some(Running { cancel, handle });
        true
    }

    /// Stop the pruning task, waiting up to `timeout` for an in-flight cycle.
    ///
    /// The pruner is `Stopped` afterwards either way. Returns `false` if the
    /// task did not finish in time; it is then left to end on its own after
    /// its current cycle.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let running = self.task.lock().take();
        let Some(running) = running else {
            return true;
        };
        running.cancel.cancel();

        match tokio::time::timeout(timeout, running.handle).await {
            Ok(Ok(())) => {
                tracing::info!(folder = %self.shared.folder, "pruner stopped");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(folder = %self.shared.folder, error = %e, "pruner task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(
                    folder = %self.shared.folder,
                    timeout_ms = timeout.as_millis() as u64,
                    "pruner did not stop in time, detaching"
                );
                false
            }
        }
    }

    /// Run one cycle now, on the caller's task.
    pub async fn run_once(&self) -> VfsResult<PruneReport> {
        self.shared
            .cycle()
            .await
            .map_err(|e| VfsError::prune_cycle(self.shared.folder.to_string(), e))
    }
}

impl Drop for FolderPruner {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl Shared {
    /// Run a cycle, reporting (never propagating) failures and panics.
    async fn guarded_cycle(&self) {
        let folder = self.folder.to_string();
        match AssertUnwindSafe(self.cycle()).catch_unwind().await {
            Ok(Ok(report)) => self.sink.notify(VfsEvent::CycleCompleted {
                folder,
                scanned: report.scanned,
                removed: report.removed.len(),
                bytes_freed: report.bytes_freed,
            }),
            Ok(Err(e)) => {
                let error = VfsError::prune_cycle(folder.clone(), e);
                self.sink.notify(VfsEvent::CycleFailed {
                    folder,
                    error: error.to_string(),
                });
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.sink.notify(VfsEvent::CycleFailed {
                    folder,
                    error: format!("cycle panicked: {message}"),
                });
            }
        }
    }

    async fn cycle(&self) -> VfsResult<PruneReport> {
        let matcher = self.policy.matcher.read().clone();
        let minimum_age = *self.policy.minimum_age.read();
        let minimum_usable = *self.policy.minimum_usable.read();
        let capacity = *self.policy.capacity.read();
        let removal = Arc::clone(&*self.policy.removal.read());

        if !self.folder.exists().await? {
            return Ok(PruneReport::default());
        }

        let mut candidates = Vec::new();
        for file in self.folder.nested_files(&matcher).await? {
            match file.attr().await {
                Ok(attr) => candidates.push((file, attr.size, attr.mtime)),
                Err(VfsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        candidates.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.path().cmp(b.0.path())));

        let matched: Vec<FileHandle> = candidates.iter().map(|(f, _, _)| f.clone()).collect();
        let mut total: u64 = candidates.iter().map(|(_, size, _)| size).sum();
        let mut report = PruneReport {
            scanned: candidates.len(),
            ..Default::default()
        };
        let now = SystemTime::now();

        for (file, size, mtime) in candidates {
            let over_capacity = capacity.is_some_and(|cap| total > cap);
            if !over_capacity && self.folder.usable_fraction().await? >= minimum_usable {
                continue;
            }
            let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
            if age < minimum_age || !removal.can_remove(&file, &matched) {
                continue;
            }

            match file.delete().await {
                Ok(true) => {
                    total = total.saturating_sub(size);
                    report.bytes_freed += size;
                    self.sink.notify(VfsEvent::FileRemoved {
                        path: file.path().to_string(),
                        size,
                    });
                    report.removed.push(file);
                }
                Ok(false) => {
                    // Already gone
                    total = total.saturating_sub(size);
                }
                Err(e) => {
                    tracing::warn!(path = %file, error = %e, "failed to prune file");
                }
            }
        }

        report.remaining_bytes = total;
        Ok(report)
    }
}
