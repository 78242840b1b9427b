//! dcachectl - inspect and maintain a disk cache directory

mod handler;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use diskcache::{BytesCodec, DigestAlgorithm, DiskCacheBuilder, AUTO_TRIM_DISABLED};
use tracing::{debug, error};

use crate::handler::{Command, CommandHandler, Outcome};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache directory
    #[arg(short, long, default_value = "./cache")]
    dir: PathBuf,

    /// File name prefix of cache entries
    #[arg(long)]
    prefix: Option<String>,

    /// File name suffix of cache entries
    #[arg(long)]
    suffix: Option<String>,

    /// Size budget in bytes (0 sizes the cache from free space)
    #[arg(short, long, default_value_t = 0)]
    max_bytes: u64,

    /// Digest used to name entry files
    #[arg(long, value_enum, default_value_t = Digest::Sha1)]
    digest: Digest,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Digest {
    Sha1,
    Sha256,
}

impl From<Digest> for DigestAlgorithm {
    fn from(digest: Digest) -> Self {
        match digest {
            Digest::Sha1 => DigestAlgorithm::Sha1,
            Digest::Sha256 => DigestAlgorithm::Sha256,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Miss) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> Result<Outcome> {
    let mut builder = DiskCacheBuilder::new(&args.dir)
        .max_disk_usage(args.max_bytes)
        .auto_trim_frequency(AUTO_TRIM_DISABLED)
        .digest(args.digest.into());
    if let Some(prefix) = args.prefix {
        builder = builder.prefix(prefix);
    }
    if let Some(suffix) = args.suffix {
        builder = builder.suffix(suffix);
    }

    let cache = builder
        .build::<str, _>(BytesCodec)
        .with_context(|| format!("Failed to open cache at {}", args.dir.display()))?;
    debug!(dir = %args.dir.display(), "Cache opened");

    let handler = CommandHandler::new(cache);
    let mut stdout = io::stdout().lock();
    let outcome = handler.handle(args.command, &mut stdout)?;
    stdout.flush()?;
    Ok(outcome)
}
