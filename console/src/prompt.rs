use std::io::{self, BufRead, Write};
use std::str::FromStr;

use filequeue::QueueService;

/// Prints `label` and reads one line from stdin. `None` at end of input.
pub fn read_line(label: &str) -> io::Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Asks until the answer parses.
pub fn ask<T: FromStr>(label: &str) -> io::Result<T> {
    loop {
        match read_line(label)? {
            Some(answer) => match answer.trim().parse() {
                Ok(value) => return Ok(value),
                Err(_) => println!("Invalid value: {}", answer.trim()),
            },
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input closed while prompting",
                ))
            }
        }
    }
}

pub fn print_status(service: &mut QueueService) {
    match service.status() {
        Ok(h) => println!(
            "capacity: {}, head: {}, tail: {}, count: {}",
            h.capacity, h.head, h.tail, h.count
        ),
        Err(e) => eprintln!("Status failed: {}", e),
    }
}
