//! Named, process-visible lock and signals.
//!
//! Every object lives in its own shared memory segment whose OS id is
//! `fq<crc32 of the canonical queue path>.<name>`. Unrelated processes that
//! know the queue file therefore reach the same objects, and two queue files
//! never share them. The receiver creates (and owns) the segments; senders
//! only open them.

use std::fmt;
use std::mem;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use raw_sync::events::{Event, EventImpl, EventInit, EventState};
use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use raw_sync::Timeout;
use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::{debug, warn};

use crate::errors::{QueueError, Result};

pub const LOCK_NAME: &str = "lock";
pub const NOT_EMPTY_NAME: &str = "not_empty";
pub const NOT_FULL_NAME: &str = "not_full";
pub const READY_PREFIX: &str = "ready_";

// raw_sync builds absolute deadlines without carrying nanoseconds into
// seconds, so it is only ever handed zero-length timeouts and waits are
// polled at this interval.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
const NO_WAIT: Timeout = Timeout::Val(Duration::ZERO);

// Reported by raw_sync when a timed condition wait gives up.
const SIGNAL_NOT_RAISED: &str = "Failed waiting for signal";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetMode {
    /// A successful wait clears the signal; one waiter per raise.
    Auto,
    /// Stays raised until reset; every waiter passes.
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Namespace of the queue stored at `path`. The file must exist.
    pub fn for_queue_file<P: AsRef<Path>>(path: P) -> Result<Namespace> {
        let canonical = path
            .as_ref()
            .canonicalize()
            .map_err(|e| QueueError::io("resolve queue file path", e))?;
        let hash = crc32fast::hash(canonical.to_string_lossy().as_bytes());
        Ok(Namespace {
            prefix: format!("fq{:08x}", hash),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn object_id(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    pub fn create_mutex(&self, name: &str) -> Result<NamedMutex> {
        let id = self.object_id(name);
        let segment = create_segment(&id, mutex_segment_len())?;
        let base = segment.as_ptr();
        let (inner, _) = unsafe { Mutex::new(base, mutex_data_ptr(base)) }
            .map_err(|e| QueueError::sync_object(&id, e))?;
        debug!(object = %id, "created lock");
        Ok(NamedMutex {
            inner,
            id,
            _segment: segment,
        })
    }

    pub fn open_mutex(&self, name: &str) -> Result<NamedMutex> {
        let id = self.object_id(name);
        let segment = open_segment(&id, mutex_segment_len())?;
        let base = segment.as_ptr();
        let (inner, _) = unsafe { Mutex::from_existing(base, mutex_data_ptr(base)) }
            .map_err(|e| QueueError::sync_object(&id, e))?;
        Ok(NamedMutex {
            inner,
            id,
            _segment: segment,
        })
    }

    pub fn create_event(&self, name: &str, mode: ResetMode, signaled: bool) -> Result<NamedEvent> {
        let id = self.object_id(name);
        let segment = create_segment(&id, Event::size_of(None))?;
        let (inner, _) = unsafe { Event::new(segment.as_ptr(), mode == ResetMode::Auto) }
            .map_err(|e| QueueError::sync_object(&id, e))?;
        let event = NamedEvent {
            inner,
            id,
            _segment: segment,
        };
        if signaled {
            event.signal()?;
        } else {
            event.reset()?;
        }
        debug!(object = %event.id, ?mode, signaled, "created signal");
        Ok(event)
    }

    pub fn open_event(&self, name: &str) -> Result<NamedEvent> {
        let id = self.object_id(name);
        let segment = open_segment(&id, Event::size_of(None))?;
        let (inner, _) = unsafe { Event::from_existing(segment.as_ptr()) }
            .map_err(|e| QueueError::sync_object(&id, e))?;
        Ok(NamedEvent {
            inner,
            id,
            _segment: segment,
        })
    }
}

fn mutex_segment_len() -> usize {
    Mutex::size_of(None) + mem::size_of::<u64>()
}

// The lock guards no in-segment data; hand it the word after itself.
fn mutex_data_ptr(base: *mut u8) -> *mut u8 {
    unsafe { base.add(Mutex::size_of(Some(base))) }
}

fn create_segment(id: &str, len: usize) -> Result<Shmem> {
    match ShmemConf::new().size(len).os_id(id).create() {
        Ok(segment) => Ok(segment),
        Err(ShmemError::MappingIdExists) => {
            // Left behind by a receiver that did not shut down cleanly.
            warn!(object = %id, "reclaiming stale sync segment");
            let mut segment = open_segment(id, len)?;
            segment.set_owner(true);
            Ok(segment)
        }
        Err(e) => Err(QueueError::sync_object(id, e)),
    }
}

fn open_segment(id: &str, len: usize) -> Result<Shmem> {
    let segment = ShmemConf::new()
        .os_id(id)
        .open()
        .map_err(|e| QueueError::sync_object(id, e))?;
    if segment.len() < len {
        return Err(QueueError::sync_object(
            id,
            format!("segment is {} bytes, need {}", segment.len(), len),
        ));
    }
    Ok(segment)
}

/// Whether a zero-length raw_sync wait failed only because the object was
/// busy or not yet raised. raw_sync appends the pthread return code to
/// lock failures (`"Failed to acquire mutex : 110"`).
fn not_yet(reason: &str) -> bool {
    if reason == SIGNAL_NOT_RAISED {
        return true;
    }
    match reason.rsplit(':').next().map(str::trim).map(str::parse::<i32>) {
        Some(Ok(code)) => code == libc::ETIMEDOUT || code == libc::EBUSY,
        _ => false,
    }
}

/// Retries `try_once` until it succeeds, fails for a reason other than
/// `not_yet`, or `timeout` elapses. Always tries at least once.
fn poll<T, E: fmt::Display>(
    id: &str,
    what: &str,
    timeout: Duration,
    mut try_once: impl FnMut() -> std::result::Result<T, E>,
) -> Result<T> {
    let started = Instant::now();
    loop {
        match try_once() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let reason = e.to_string();
                if !not_yet(&reason) {
                    return Err(QueueError::sync_object(id, reason));
                }
            }
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(QueueError::timeout(format!("{} `{}`", what, id), waited));
        }
        thread::sleep(POLL_INTERVAL.min(timeout - waited));
    }
}

/// System-wide mutual exclusion over the header/slot region.
pub struct NamedMutex {
    inner: Box<dyn LockImpl>,
    id: String,
    _segment: Shmem,
}

impl NamedMutex {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Blocks until the lock is held or `timeout` elapses. The lock is
    /// released when the guard drops.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        let inner = &self.inner;
        poll(&self.id, "lock", timeout, move || inner.try_lock(NO_WAIT))
    }
}

pub struct NamedEvent {
    inner: Box<dyn EventImpl>,
    id: String,
    _segment: Shmem,
}

impl NamedEvent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wait(&self, timeout: Duration) -> Result<()> {
        poll(&self.id, "signal", timeout, || self.inner.wait(NO_WAIT))
    }

    pub fn signal(&self) -> Result<()> {
        self.inner
            .set(EventState::Signaled)
            .map_err(|e| QueueError::sync_object(&self.id, e))
    }

    pub fn reset(&self) -> Result<()> {
        self.inner
            .set(EventState::Clear)
            .map_err(|e| QueueError::sync_object(&self.id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(2);

    fn namespace() -> (TempDir, Namespace) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");
        std::fs::write(&path, b"").unwrap();
        let ns = Namespace::for_queue_file(&path).unwrap();
        (dir, ns)
    }

    fn assert_timeout<T>(result: Result<T>) {
        match result {
            Err(QueueError::Timeout { .. }) => {}
            Err(e) => panic!("expected timeout, got {:?}", e),
            Ok(_) => panic!("expected timeout, wait succeeded"),
        }
    }

    #[test]
    fn namespace_follows_the_file() {
        let (dir, ns) = namespace();
        let again = Namespace::for_queue_file(dir.path().join("queue.bin")).unwrap();
        assert_eq!(ns, again);
        assert!(ns.object_id(LOCK_NAME).starts_with("fq"));
        assert!(ns.object_id(LOCK_NAME).ends_with(".lock"));

        let other = dir.path().join("other.bin");
        std::fs::write(&other, b"").unwrap();
        assert_ne!(Namespace::for_queue_file(&other).unwrap(), ns);
    }

    #[test]
    fn namespace_of_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Namespace::for_queue_file(dir.path().join("absent.bin")),
            Err(QueueError::Io { .. })
        ));
    }

    #[test]
    fn open_before_create_fails() {
        let (_dir, ns) = namespace();
        assert!(matches!(ns.open_mutex(LOCK_NAME), Err(QueueError::SyncObject { .. })));
        assert!(matches!(ns.open_event(NOT_FULL_NAME), Err(QueueError::SyncObject { .. })));
    }

    #[test]
    fn manual_reset_stays_raised() {
        let (_dir, ns) = namespace();
        let event = ns.create_event(NOT_FULL_NAME, ResetMode::Manual, true).unwrap();
        event.wait(SHORT).unwrap();
        event.wait(SHORT).unwrap();
        event.reset().unwrap();
        assert_timeout(event.wait(SHORT));
    }

    #[test]
    fn auto_reset_lets_one_wait_through() {
        let (_dir, ns) = namespace();
        let event = ns.create_event(NOT_EMPTY_NAME, ResetMode::Auto, false).unwrap();
        assert_timeout(event.wait(SHORT));
        event.signal().unwrap();
        event.signal().unwrap();
        event.wait(SHORT).unwrap();
        assert_timeout(event.wait(SHORT));
    }

    #[test]
    fn signal_crosses_handles() {
        let (_dir, ns) = namespace();
        let owner = ns.create_event(NOT_EMPTY_NAME, ResetMode::Auto, false).unwrap();
        let peer_ns = ns.clone();
        let raiser = thread::spawn(move || {
            let peer = peer_ns.open_event(NOT_EMPTY_NAME).unwrap();
            thread::sleep(SHORT);
            peer.signal().unwrap();
        });
        owner.wait(LONG).unwrap();
        raiser.join().unwrap();
    }

    #[test]
    fn fractional_wait_blocks_until_raised() {
        let (_dir, ns) = namespace();
        let owner = ns.create_event(NOT_EMPTY_NAME, ResetMode::Auto, false).unwrap();
        let peer_ns = ns.clone();
        let raiser = thread::spawn(move || {
            let peer = peer_ns.open_event(NOT_EMPTY_NAME).unwrap();
            thread::sleep(Duration::from_millis(300));
            peer.signal().unwrap();
        });
        let started = Instant::now();
        owner.wait(Duration::from_millis(1_750)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        raiser.join().unwrap();
    }

    #[test]
    fn fractional_acquire_waits_for_release() {
        let (_dir, ns) = namespace();
        let lock = ns.create_mutex(LOCK_NAME).unwrap();
        let peer_ns = ns.clone();
        let (tx, rx) = mpsc::channel();
        let holder = thread::spawn(move || {
            let peer = peer_ns.open_mutex(LOCK_NAME).unwrap();
            let guard = peer.acquire(LONG).unwrap();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(guard);
        });
        rx.recv().unwrap();
        let started = Instant::now();
        let guard = lock.acquire(Duration::from_millis(1_750)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        drop(guard);
        holder.join().unwrap();
    }

    #[test]
    fn only_busy_and_unraised_count_as_not_yet() {
        assert!(not_yet(SIGNAL_NOT_RAISED));
        assert!(not_yet(&format!("Failed to acquire mutex : {}", libc::ETIMEDOUT)));
        assert!(not_yet(&format!("Failed to acquire mutex : {}", libc::EBUSY)));
        assert!(!not_yet(&format!("Failed to acquire mutex : {}", libc::EINVAL)));
        assert!(!not_yet("Existing Event is corrupted"));
    }

    #[test]
    fn hard_failure_is_not_a_timeout_even_at_the_deadline() {
        let err = poll::<(), _>("fq0.lock", "lock", Duration::ZERO, || {
            Err(format!("Failed to acquire mutex : {}", libc::EINVAL))
        })
        .unwrap_err();
        assert!(matches!(err, QueueError::SyncObject { .. }), "{:?}", err);

        let mut tries = 0;
        let err = poll::<(), _>("fq0.lock", "lock", Duration::from_millis(20), || {
            tries += 1;
            Err(format!("Failed to acquire mutex : {}", libc::ETIMEDOUT))
        })
        .unwrap_err();
        assert!(matches!(err, QueueError::Timeout { .. }), "{:?}", err);
        assert!(tries > 1);
    }

    #[test]
    fn held_lock_times_out_elsewhere() {
        let (_dir, ns) = namespace();
        let lock = ns.create_mutex(LOCK_NAME).unwrap();
        let guard = lock.acquire(LONG).unwrap();

        let peer_ns = ns.clone();
        let (tx, rx) = mpsc::channel();
        let contender = thread::spawn(move || {
            let peer = peer_ns.open_mutex(LOCK_NAME).unwrap();
            let first = peer.acquire(SHORT).map(|_| ());
            tx.send(()).unwrap();
            let second = peer.acquire(LONG).map(|_| ());
            (first, second)
        });

        rx.recv().unwrap();
        drop(guard);
        let (first, second) = contender.join().unwrap();
        assert_timeout(first);
        second.unwrap();
    }

    #[test]
    fn dropping_the_owner_removes_the_object() {
        let (_dir, ns) = namespace();
        let event = ns.create_event(NOT_FULL_NAME, ResetMode::Manual, true).unwrap();
        drop(event);
        assert!(matches!(ns.open_event(NOT_FULL_NAME), Err(QueueError::SyncObject { .. })));
    }
}
