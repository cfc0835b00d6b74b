use serde_derive::{Deserialize, Serialize};

use crate::errors::{QueueError, Result};

const LENGTH_FIELD: usize = 2;

/// How a message is laid out inside its fixed-size slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotFormat {
    /// The slot is the message. Trailing zero padding is trimmed on read.
    Raw,
    /// A little-endian `u16` length precedes the payload. Not recorded in
    /// the file, so every attached process must agree on it.
    LengthPrefixed,
}

impl Default for SlotFormat {
    fn default() -> Self {
        SlotFormat::Raw
    }
}

impl SlotFormat {
    pub fn check(&self, slot_size: usize) -> Result<()> {
        match self {
            SlotFormat::Raw => Ok(()),
            SlotFormat::LengthPrefixed => {
                let payload = slot_size.saturating_sub(LENGTH_FIELD);
                if payload == 0 || payload > u16::MAX as usize {
                    Err(QueueError::config(format!(
                        "slot size {} cannot hold a length-prefixed payload",
                        slot_size
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Largest message that survives a round trip unchanged.
    pub fn max_message_len(&self, slot_size: usize) -> usize {
        match self {
            SlotFormat::Raw => slot_size,
            SlotFormat::LengthPrefixed => slot_size.saturating_sub(LENGTH_FIELD),
        }
    }

    /// Bytes to hand to the record store for `message`.
    pub fn encode(&self, message: &[u8], slot_size: usize) -> Vec<u8> {
        let n = message.len().min(self.max_message_len(slot_size));
        match self {
            SlotFormat::Raw => message[..n].to_vec(),
            SlotFormat::LengthPrefixed => {
                let mut buf = Vec::with_capacity(LENGTH_FIELD + n);
                buf.extend_from_slice(&(n as u16).to_le_bytes());
                buf.extend_from_slice(&message[..n]);
                buf
            }
        }
    }

    /// Message carried by a full slot read from the record store.
    pub fn decode(&self, mut slot: Vec<u8>) -> Vec<u8> {
        match self {
            SlotFormat::Raw => {
                let len = slot.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                slot.truncate(len);
                slot
            }
            SlotFormat::LengthPrefixed => {
                if slot.len() < LENGTH_FIELD {
                    return Vec::new();
                }
                let len = u16::from_le_bytes([slot[0], slot[1]]) as usize;
                let end = (LENGTH_FIELD + len).min(slot.len());
                slot[LENGTH_FIELD..end].to_vec()
            }
        }
    }
}
