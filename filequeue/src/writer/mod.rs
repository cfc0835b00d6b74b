use std::path::Path;

use tracing::debug;

use super::core::*;
use crate::errors::Result;
use crate::ready;
use crate::sync::NOT_FULL_NAME;

/// Producer handle. Any number of these may be attached to one queue.
pub struct MessageWriter {
    service: QueueService,
}

impl MessageWriter {
    /// Attaches to a queue the receiver has already created. Fails if the
    /// file or any of the named sync objects is missing.
    pub fn open<P: AsRef<Path>>(path: P, cfg: &QueueConfig) -> Result<MessageWriter> {
        let service = QueueService::attach(path.as_ref(), cfg)?;
        Ok(MessageWriter { service })
    }

    pub fn service(&mut self) -> &mut QueueService {
        &mut self.service
    }

    /// Raises this producer's readiness signal for the receiver.
    pub fn signal_ready(&self, ordinal: usize) -> Result<()> {
        ready::signal_ready(self.service.namespace(), ordinal)
    }

    /// Appends `message` (truncated to the slot) at the tail and returns the
    /// slot index it went into. Blocks while the queue is full, up to the
    /// configured wait timeout.
    pub fn enqueue(&mut self, message: &[u8]) -> Result<usize> {
        let svc = &mut self.service;
        let payload = svc.cfg.slot_format.encode(message, svc.store.slot_size());
        let attempt = Attempt::start(svc.cfg.wait_timeout());
        loop {
            attempt.check(svc.not_full.wait(attempt.remaining()))?;
            let guard = attempt.check(svc.lock.acquire(attempt.remaining()))?;

            let header = svc.store.read_header()?;
            if header.is_full() {
                // Another producer took the last slot after not-full let us in.
                svc.not_full.reset()?;
                drop(guard);
                svc.race("full", NOT_FULL_NAME)?;
                continue;
            }

            let index = header.tail as usize;
            svc.store.write_slot(index, &payload)?;
            let header = header.pushed();
            // Header write commits the message.
            svc.store.write_header(&header)?;
            if header.is_full() {
                after_commit(svc.not_full.id(), svc.not_full.reset());
            }
            drop(guard);

            after_commit(svc.not_empty.id(), svc.not_empty.signal());
            debug!(slot = index, count = header.count, "enqueued");
            return Ok(index);
        }
    }
}
