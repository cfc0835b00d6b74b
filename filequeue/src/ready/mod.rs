//! One-shot startup handshake between the receiver and each sender.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::{QueueError, Result};
use crate::sync::{Namespace, NamedEvent, ResetMode, READY_PREFIX};

pub fn ready_name(ordinal: usize) -> String {
    format!("{}{}", READY_PREFIX, ordinal)
}

/// Raised once by sender `ordinal` after it has attached to the queue.
pub fn signal_ready(namespace: &Namespace, ordinal: usize) -> Result<()> {
    let event = namespace.open_event(&ready_name(ordinal))?;
    event.signal()?;
    info!(ordinal, "sender ready");
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadyOutcome {
    pub ready: Vec<usize>,
    pub missing: Vec<usize>,
}

impl ReadyOutcome {
    pub fn all_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

/// The receiver's side: one auto-reset signal per expected sender, created
/// before any sender exists.
pub struct ReadySignals {
    events: Vec<NamedEvent>,
}

impl ReadySignals {
    pub fn create(namespace: &Namespace, senders: usize) -> Result<ReadySignals> {
        let events = (0..senders)
            .map(|ordinal| namespace.create_event(&ready_name(ordinal), ResetMode::Auto, false))
            .collect::<Result<Vec<_>>>()?;
        Ok(ReadySignals { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Waits for every sender, sharing one deadline. Senders that do not
    /// signal in time are reported, not treated as fatal.
    pub fn await_all(&self, timeout: Duration) -> Result<ReadyOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcome = ReadyOutcome::default();
        for (ordinal, event) in self.events.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match event.wait(remaining) {
                Ok(()) => outcome.ready.push(ordinal),
                Err(QueueError::Timeout { .. }) => outcome.missing.push(ordinal),
                Err(e) => return Err(e),
            }
        }
        if !outcome.all_ready() {
            warn!(missing = ?outcome.missing, "senders did not report ready in time");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn names_carry_the_ordinal() {
        assert_eq!(ready_name(0), "ready_0");
        assert_eq!(ready_name(12), "ready_12");
    }

    #[test]
    fn reports_senders_that_never_signal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");
        std::fs::write(&path, b"").unwrap();
        let ns = Namespace::for_queue_file(&path).unwrap();

        let signals = ReadySignals::create(&ns, 3).unwrap();
        assert_eq!(signals.len(), 3);

        let handles: Vec<_> = [0usize, 2]
            .iter()
            .map(|&ordinal| {
                let ns = ns.clone();
                thread::spawn(move || signal_ready(&ns, ordinal))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let outcome = signals.await_all(Duration::from_millis(200)).unwrap();
        assert_eq!(outcome.ready, vec![0, 2]);
        assert_eq!(outcome.missing, vec![1]);
        assert!(!outcome.all_ready());
    }

    #[test]
    fn waits_for_a_late_sender() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");
        std::fs::write(&path, b"").unwrap();
        let ns = Namespace::for_queue_file(&path).unwrap();
        let signals = ReadySignals::create(&ns, 1).unwrap();

        let late = {
            let ns = ns.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                signal_ready(&ns, 0)
            })
        };
        let outcome = signals.await_all(Duration::from_millis(2_500)).unwrap();
        late.join().unwrap().unwrap();
        assert!(outcome.all_ready());
        assert_eq!(outcome.ready, vec![0]);
    }

    #[test]
    fn unknown_ordinal_cannot_signal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.bin");
        std::fs::write(&path, b"").unwrap();
        let ns = Namespace::for_queue_file(&path).unwrap();
        let _signals = ReadySignals::create(&ns, 1).unwrap();
        assert!(matches!(
            signal_ready(&ns, 5),
            Err(QueueError::SyncObject { .. })
        ));
    }
}
