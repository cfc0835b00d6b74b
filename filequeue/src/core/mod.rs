use std::path::Path;
use std::time::{Duration, Instant};

use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{QueueError, Result};
use crate::format::SlotFormat;
use crate::store::{check_slot_size, QueueHeader, RecordStore, DEFAULT_SLOT_SIZE};
use crate::sync::{
    Namespace, NamedEvent, NamedMutex, ResetMode, LOCK_NAME, NOT_EMPTY_NAME, NOT_FULL_NAME,
};

pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;

/// What an enqueue/dequeue does when the queue turns out full/empty under
/// the lock right after its signal let it through.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePolicy {
    /// Wait on the signal again until the attempt deadline.
    Retry,
    /// Give up with `QueueError::ProtocolRace`.
    Report,
}

impl Default for RacePolicy {
    fn default() -> Self {
        RacePolicy::Retry
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub slot_size: usize,
    /// Deadline for one enqueue/dequeue attempt, signal waits and lock
    /// acquisition included.
    pub wait_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub race_policy: RacePolicy,
    pub slot_format: SlotFormat,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            slot_size: DEFAULT_SLOT_SIZE,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            race_policy: RacePolicy::default(),
            slot_format: SlotFormat::default(),
        }
    }
}

impl QueueConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        check_slot_size(self.slot_size)?;
        self.slot_format.check(self.slot_size)
    }
}

/// One bounded enqueue/dequeue attempt.
pub(crate) struct Attempt {
    started: Instant,
    deadline: Instant,
}

impl Attempt {
    pub(crate) fn start(timeout: Duration) -> Attempt {
        let started = Instant::now();
        Attempt {
            started,
            deadline: started + timeout,
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Reports timeouts against the whole attempt rather than the last wait.
    pub(crate) fn check<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| match e {
            QueueError::Timeout { what, .. } => {
                let waited = self.started.elapsed();
                warn!(%what, ?waited, "queue operation abandoned");
                QueueError::Timeout { what, waited }
            }
            other => other,
        })
    }
}

/// Applies a signal update that follows the header write. The operation is
/// committed by then, so a failure is logged and the caller still succeeds.
pub(crate) fn after_commit(signal: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(%signal, error = %e, "signal update failed after commit");
            false
        }
    }
}

/// The queue file plus the lock and both signals, as seen by one process.
pub struct QueueService {
    pub(crate) store: RecordStore,
    pub(crate) lock: NamedMutex,
    pub(crate) not_empty: NamedEvent,
    pub(crate) not_full: NamedEvent,
    pub(crate) namespace: Namespace,
    pub(crate) cfg: QueueConfig,
}

impl QueueService {
    /// Receiver start: a fresh, zeroed file and newly created sync objects.
    pub(crate) fn create(path: &Path, capacity: u32, cfg: &QueueConfig) -> Result<QueueService> {
        cfg.validate()?;
        let store = RecordStore::create(path, capacity, cfg.slot_size)?;
        let service = QueueService::own(store, QueueHeader::new(capacity), cfg)?;
        info!(path = %path.display(), capacity, slot_size = cfg.slot_size, "created queue");
        Ok(service)
    }

    /// Receiver restart: keeps the file contents and seeds both signals from
    /// the persisted header.
    pub(crate) fn reopen(path: &Path, cfg: &QueueConfig) -> Result<QueueService> {
        cfg.validate()?;
        let mut store = RecordStore::open(path, cfg.slot_size)?;
        let header = store.read_header()?;
        let service = QueueService::own(store, header, cfg)?;
        info!(path = %path.display(), ?header, "reopened queue");
        Ok(service)
    }

    fn own(store: RecordStore, header: QueueHeader, cfg: &QueueConfig) -> Result<QueueService> {
        let namespace = Namespace::for_queue_file(store.path())?;
        let lock = namespace.create_mutex(LOCK_NAME)?;
        let not_empty = namespace.create_event(NOT_EMPTY_NAME, ResetMode::Auto, !header.is_empty())?;
        let not_full = namespace.create_event(NOT_FULL_NAME, ResetMode::Manual, !header.is_full())?;
        Ok(QueueService {
            store,
            lock,
            not_empty,
            not_full,
            namespace,
            cfg: cfg.clone(),
        })
    }

    /// Sender start: the file and every sync object must already exist.
    pub(crate) fn attach(path: &Path, cfg: &QueueConfig) -> Result<QueueService> {
        cfg.validate()?;
        let store = RecordStore::open(path, cfg.slot_size)?;
        let namespace = Namespace::for_queue_file(store.path())?;
        let lock = namespace.open_mutex(LOCK_NAME)?;
        let not_empty = namespace.open_event(NOT_EMPTY_NAME)?;
        let not_full = namespace.open_event(NOT_FULL_NAME)?;
        Ok(QueueService {
            store,
            lock,
            not_empty,
            not_full,
            namespace,
            cfg: cfg.clone(),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn capacity(&self) -> u32 {
        self.store.capacity()
    }

    /// Largest message that is stored without truncation.
    pub fn max_message_len(&self) -> usize {
        self.cfg.slot_format.max_message_len(self.store.slot_size())
    }

    /// Header as of now, read under the lock.
    pub fn status(&mut self) -> Result<QueueHeader> {
        let attempt = Attempt::start(self.cfg.wait_timeout());
        let _guard = attempt.check(self.lock.acquire(attempt.remaining()))?;
        self.store.read_header()
    }

    pub(crate) fn race(&self, state: &'static str, signal: &'static str) -> Result<()> {
        warn!(state, signal, policy = ?self.cfg.race_policy, "queue state changed before the lock was taken");
        match self.cfg.race_policy {
            RacePolicy::Retry => Ok(()),
            RacePolicy::Report => Err(QueueError::ProtocolRace { state, signal }),
        }
    }
}
