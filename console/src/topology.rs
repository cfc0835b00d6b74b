//! Sender process lifecycle: spawning, teardown, and teardown on
//! termination signals.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, Child, Command};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

/// Everything needed to start sender `ordinal` against one queue.
pub struct Launch<'a> {
    pub exe: PathBuf,
    pub config_path: &'a str,
    pub queue_file: &'a Path,
    pub launcher: &'a [String],
}

impl<'a> Launch<'a> {
    /// Command line of a sender, without the launcher prefix.
    pub fn sender_args(&self, ordinal: usize) -> Vec<String> {
        vec![
            self.exe.display().to_string(),
            "--config".to_string(),
            self.config_path.to_string(),
            "sender".to_string(),
            self.queue_file.display().to_string(),
            ordinal.to_string(),
        ]
    }

    fn command(&self, ordinal: usize) -> Option<Command> {
        let mut argv = self.launcher.iter().cloned().chain(self.sender_args(ordinal));
        let mut command = Command::new(argv.next()?);
        command.args(argv);
        Some(command)
    }
}

#[derive(Clone, Default)]
pub struct SenderProcesses {
    children: Arc<Mutex<Vec<Child>>>,
}

impl SenderProcesses {
    fn children(&self) -> MutexGuard<'_, Vec<Child>> {
        match self.children.lock() {
            Ok(children) => children,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts sender `ordinal` and returns its pid.
    pub fn spawn_producer(&self, launch: &Launch<'_>, ordinal: usize) -> io::Result<u32> {
        let mut command = launch
            .command(ordinal)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty sender command"))?;
        let child = command.spawn()?;
        let pid = child.id();
        info!(ordinal, pid, "spawned sender");
        self.children().push(child);
        Ok(pid)
    }

    pub fn len(&self) -> usize {
        self.children().len()
    }

    pub fn terminate_all(&self) {
        for mut child in self.children().drain(..) {
            let pid = child.id();
            if let Err(e) = child.kill() {
                // Already exited.
                info!(pid, error = %e, "sender not killed");
            }
            if let Err(e) = child.wait() {
                warn!(pid, error = %e, "failed to reap sender");
            }
        }
    }

    /// Terminates every spawned sender when the returned guard drops, on
    /// whichever path the receiver leaves by.
    pub fn teardown_on_drop(&self) -> Teardown<'_> {
        Teardown { processes: self }
    }

    /// Tears the senders down and exits when the receiver is told to stop.
    pub fn terminate_on_signals(&self) -> io::Result<()> {
        let mut signals = Signals::new(&[SIGHUP, SIGINT, SIGQUIT, SIGTERM])?;
        let processes = self.clone();
        thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                warn!(signal, "receiver interrupted, terminating senders");
                processes.terminate_all();
                process::exit(128 + signal);
            }
        });
        Ok(())
    }
}

pub struct Teardown<'a> {
    processes: &'a SenderProcesses,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.processes.terminate_all();
    }
}
