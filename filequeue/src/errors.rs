use std::{io, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// File create/open/read/write failure. The io error carries the OS code.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A named lock or signal could not be created or opened.
    #[error("sync object `{name}` unavailable: {reason}")]
    SyncObject { name: String, reason: String },

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// The queue was found full (or empty) under the lock right after the
    /// matching signal let us through.
    #[error("queue found {state} after waking on `{signal}`")]
    ProtocolRace {
        state: &'static str,
        signal: &'static str,
    },

    #[error("corrupt queue header: {0}")]
    CorruptHeader(String),

    #[error("queue file layout mismatch: {0}")]
    Layout(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl QueueError {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        QueueError::Io { op, source }
    }

    pub fn sync_object(name: impl Into<String>, reason: impl ToString) -> Self {
        QueueError::SyncObject {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        QueueError::Timeout {
            what: what.into(),
            waited,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        QueueError::Config(message.into())
    }

    /// True for failures that only abandon the current attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Timeout { .. } | QueueError::ProtocolRace { .. }
        )
    }

    /// Raw OS error code of an underlying I/O failure, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            QueueError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_message_names_operation_and_code() {
        let err = QueueError::io("read queue header", io::Error::from_raw_os_error(2));
        let text = err.to_string();
        assert!(text.starts_with("read queue header failed"), "{}", text);
        assert!(text.contains("os error 2"), "{}", text);
        assert_eq!(err.os_error(), Some(2));
    }

    #[test]
    fn only_timeouts_and_races_are_transient() {
        assert!(QueueError::timeout("queue lock", Duration::from_millis(5)).is_transient());
        assert!(QueueError::ProtocolRace {
            state: "full",
            signal: "not_full"
        }
        .is_transient());
        assert!(!QueueError::sync_object("lock", "missing").is_transient());
        assert!(!QueueError::config("bad").is_transient());
    }
}
