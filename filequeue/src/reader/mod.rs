use std::borrow::Cow;
use std::path::Path;

use tracing::debug;

use super::core::*;
use crate::errors::Result;
use crate::sync::NOT_EMPTY_NAME;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Slot the message was read from.
    pub slot: usize,
    pub data: Vec<u8>,
}

impl Message {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// The single consumer. Owns the queue file's creation and the named
/// sync objects for as long as it lives.
pub struct MessageReader {
    service: QueueService,
}

impl MessageReader {
    /// Creates (truncating) the queue file with `capacity` empty slots and
    /// the lock and signals that senders attach to.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u32, cfg: &QueueConfig) -> Result<MessageReader> {
        let service = QueueService::create(path.as_ref(), capacity, cfg)?;
        Ok(MessageReader { service })
    }

    /// Attaches to a queue file left by an earlier receiver, keeping its
    /// messages.
    pub fn reopen<P: AsRef<Path>>(path: P, cfg: &QueueConfig) -> Result<MessageReader> {
        let service = QueueService::reopen(path.as_ref(), cfg)?;
        Ok(MessageReader { service })
    }

    pub fn service(&mut self) -> &mut QueueService {
        &mut self.service
    }

    /// Takes the message at the head. Blocks while the queue is empty, up to
    /// the configured wait timeout.
    pub fn dequeue(&mut self) -> Result<Message> {
        let svc = &mut self.service;
        let attempt = Attempt::start(svc.cfg.wait_timeout());
        loop {
            attempt.check(svc.not_empty.wait(attempt.remaining()))?;
            let guard = attempt.check(svc.lock.acquire(attempt.remaining()))?;

            let header = svc.store.read_header()?;
            if header.is_empty() {
                // A raise from a producer that committed before our last dequeue.
                svc.not_empty.reset()?;
                drop(guard);
                svc.race("empty", NOT_EMPTY_NAME)?;
                continue;
            }

            let index = header.head as usize;
            let slot = svc.store.read_slot(index)?;
            let header = header.popped();
            svc.store.write_header(&header)?;

            // Our wait consumed the auto-reset signal; raise it again while
            // messages remain.
            let rearm = if header.is_empty() {
                svc.not_empty.reset()
            } else {
                svc.not_empty.signal()
            };
            after_commit(svc.not_empty.id(), rearm);
            after_commit(svc.not_full.id(), svc.not_full.signal());
            drop(guard);

            debug!(slot = index, count = header.count, "dequeued");
            return Ok(Message {
                slot: index,
                data: svc.cfg.slot_format.decode(slot),
            });
        }
    }
}
