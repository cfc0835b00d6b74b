use std::env;
use std::error::Error;
use std::io;
use std::path::PathBuf;

use filequeue::{MessageReader, ReadyOutcome, ReadySignals};
use tracing::warn;

use crate::config::ConsoleConfig;
use crate::prompt;
use crate::topology::{Launch, SenderProcesses};

pub fn run(cfg: &ConsoleConfig, config_path: &str) -> Result<(), Box<dyn Error>> {
    let queue_file = match &cfg.queue_file {
        Some(file) => PathBuf::from(file),
        None => PathBuf::from(prompt::ask::<String>("Binary file name: ")?),
    };

    let mut reader = if cfg.reopen_existing && queue_file.exists() {
        let reader = MessageReader::reopen(&queue_file, &cfg.queue)?;
        println!("Reopened {}", queue_file.display());
        reader
    } else {
        let capacity = match cfg.capacity {
            Some(capacity) => capacity,
            None => prompt::ask("Number of records: ")?,
        };
        MessageReader::create(&queue_file, capacity, &cfg.queue)?
    };

    let senders = match cfg.senders {
        Some(senders) => senders,
        None => prompt::ask("Number of senders: ")?,
    };
    let ready = ReadySignals::create(reader.service().namespace(), senders)?;

    let processes = SenderProcesses::default();
    let _teardown = processes.teardown_on_drop();
    processes.terminate_on_signals()?;
    let launch = Launch {
        exe: env::current_exe()?,
        config_path,
        queue_file: &queue_file,
        launcher: &cfg.launcher,
    };

    if cfg.launcher.is_empty() {
        println!("No launcher configured. Start each sender in its own terminal:");
        for ordinal in 0..senders {
            println!("  {}", launch.sender_args(ordinal).join(" "));
        }
    } else {
        for ordinal in 0..senders {
            match processes.spawn_producer(&launch, ordinal) {
                Ok(pid) => println!("Started sender #{} with PID: {}", ordinal, pid),
                Err(e) => eprintln!("Failed to start sender #{}: {}", ordinal, e),
            }
        }
        if processes.len() < senders {
            println!("Started {} of {} senders.", processes.len(), senders);
        }
    }

    println!("Waiting for senders to be ready...");
    let outcome = ready.await_all(cfg.queue.ready_timeout())?;
    report_readiness(&outcome, &launch);

    handle_commands(&mut reader)?;
    Ok(())
}

fn report_readiness(outcome: &ReadyOutcome, launch: &Launch<'_>) {
    if outcome.all_ready() {
        println!("All senders are ready.");
        return;
    }
    println!("Timeout waiting for senders. Some senders may not be ready.");
    println!("You can manually start senders with command:");
    for &ordinal in &outcome.missing {
        println!("  {}", launch.sender_args(ordinal).join(" "));
    }
}

fn handle_commands(reader: &mut MessageReader) -> io::Result<()> {
    loop {
        let command = match prompt::read_line("Receiver command (read/status/exit): ")? {
            Some(command) => command,
            None => break,
        };
        match command.trim() {
            "exit" => break,
            "read" => match reader.dequeue() {
                Ok(message) => println!("Received: {}", message.text()),
                Err(e) => {
                    if !e.is_transient() {
                        warn!(error = %e, "dequeue failed");
                    }
                    eprintln!("Read failed: {}", e);
                }
            },
            "status" => prompt::print_status(reader.service()),
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }
    Ok(())
}
