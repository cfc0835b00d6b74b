use std::error::Error;
use std::io;
use std::path::Path;

use filequeue::MessageWriter;

use crate::config::ConsoleConfig;
use crate::prompt;

pub fn run(cfg: &ConsoleConfig, queue_file: &Path, ordinal: usize) -> Result<(), Box<dyn Error>> {
    println!("Sender #{} starting...", ordinal);
    // Any attach failure ends this sender's participation.
    let mut writer = MessageWriter::open(queue_file, &cfg.queue)?;
    writer.signal_ready(ordinal)?;
    println!("Sender #{} ready.", ordinal);

    handle_commands(&mut writer)?;
    Ok(())
}

fn handle_commands(writer: &mut MessageWriter) -> io::Result<()> {
    let max_len = writer.service().max_message_len();
    loop {
        let command = match prompt::read_line("Sender command (send/status/exit): ")? {
            Some(command) => command,
            None => break,
        };
        match command.trim() {
            "exit" => break,
            "send" => {
                let message = match prompt::read_line("Message: ")? {
                    Some(message) => message,
                    None => break,
                };
                if message.len() > max_len {
                    println!("Message truncated to {} bytes", max_len);
                }
                match writer.enqueue(message.as_bytes()) {
                    Ok(slot) => println!("Message sent successfully (slot {})", slot),
                    Err(e) => eprintln!("Send failed: {}", e),
                }
            }
            "status" => prompt::print_status(writer.service()),
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }
    Ok(())
}
