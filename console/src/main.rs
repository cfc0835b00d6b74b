use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod prompt;
mod receiver;
mod sender;
mod topology;

use config::ConsoleConfig;

#[derive(clap::Parser)]
#[clap(about = "File-backed message queue shared by one receiver and many senders")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "filequeue.toml")]
    config: String,
    /// Runs as the receiver when omitted.
    #[clap(subcommand)]
    mode: Option<Mode>,
}

#[derive(clap::Subcommand)]
enum Mode {
    /// Attach to an existing queue file as producer number ORDINAL.
    Sender { queue_file: PathBuf, ordinal: usize },
}

fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so they do not interleave with prompts.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let opts: Opts = Opts::parse();
    let cfg: ConsoleConfig = confy::load_path(&opts.config)?;
    match opts.mode {
        None => receiver::run(&cfg, &opts.config),
        Some(Mode::Sender { queue_file, ordinal }) => sender::run(&cfg, &queue_file, ordinal),
    }
}
