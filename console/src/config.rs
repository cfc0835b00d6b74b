use serde_derive::{Deserialize, Serialize};

use filequeue::QueueConfig;

/// Contents of the console's TOML config file. Receiver values left unset
/// are prompted for at startup.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub queue_file: Option<String>,
    pub capacity: Option<u32>,
    pub senders: Option<usize>,
    /// Keep an existing queue file's messages instead of recreating it.
    pub reopen_existing: bool,
    /// Command prefix that opens a terminal for each spawned sender, e.g.
    /// `["xterm", "-e"]`. Senders are not spawned when empty.
    pub launcher: Vec<String>,
    // Tables serialize after plain values.
    pub queue: QueueConfig,
}
