//! Subcommands and their execution against an open cache

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use diskcache::{desired_size, BytesCodec, DiskCache};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a value read from stdin or a file
    Put {
        key: String,
        /// Read the value from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print a value; exits with status 1 on a miss
    Get {
        key: String,
        /// Write the value to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check for an entry; exits with status 1 when absent
    Contains { key: String },
    /// Remove one entry
    Rm { key: String },
    /// Remove every entry
    Clear,
    /// Trim the cache to its budget
    Trim,
    /// Show size and activity
    Stats {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the file token and path for a key
    Token { key: String },
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Miss,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    dir: String,
    entries: usize,
    disk_usage: u64,
    free_space: u64,
    max_disk_usage: u64,
    target_size: u64,
}

pub struct CommandHandler {
    cache: DiskCache<str, BytesCodec>,
}

impl CommandHandler {
    pub fn new(cache: DiskCache<str, BytesCodec>) -> Self {
        Self { cache }
    }

    pub fn handle<W: Write>(&self, command: Command, out: &mut W) -> Result<Outcome> {
        match command {
            Command::Put { key, file } => self.handle_put(&key, file, out),
            Command::Get { key, out: path } => self.handle_get(&key, path, out),
            Command::Contains { key } => self.handle_contains(&key, out),
            Command::Rm { key } => self.handle_rm(&key, out),
            Command::Clear => self.handle_clear(out),
            Command::Trim => self.handle_trim(out),
            Command::Stats { json } => self.handle_stats(json, out),
            Command::Token { key } => self.handle_token(&key, out),
        }
    }

    fn handle_put<W: Write>(&self, key: &str, file: Option<PathBuf>, out: &mut W) -> Result<Outcome> {
        let mut source: Box<dyn Read> = match &file {
            Some(path) => Box::new(
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
            ),
            None => Box::new(io::stdin().lock()),
        };

        let written = self
            .cache
            .put_raw(key, &mut source)
            .with_context(|| format!("Failed to store {:?}", key))?;
        writeln!(out, "{}", written)?;
        Ok(Outcome::Done)
    }

    fn handle_get<W: Write>(&self, key: &str, path: Option<PathBuf>, out: &mut W) -> Result<Outcome> {
        let Some(value) = self
            .cache
            .get(key)
            .with_context(|| format!("Failed to read {:?}", key))?
        else {
            return Ok(Outcome::Miss);
        };

        match path {
            Some(path) => fs::write(&path, &value)
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => out.write_all(&value)?,
        }
        Ok(Outcome::Done)
    }

    fn handle_contains<W: Write>(&self, key: &str, out: &mut W) -> Result<Outcome> {
        let present = self.cache.contains(key);
        writeln!(out, "{}", present)?;
        Ok(if present { Outcome::Done } else { Outcome::Miss })
    }

    fn handle_rm<W: Write>(&self, key: &str, out: &mut W) -> Result<Outcome> {
        let removed = self
            .cache
            .clear_entry(key)
            .with_context(|| format!("Failed to remove {:?}", key))?;
        writeln!(out, "{}", u8::from(removed))?;
        Ok(Outcome::Done)
    }

    fn handle_clear<W: Write>(&self, out: &mut W) -> Result<Outcome> {
        let summary = self.cache.clear().context("Failed to clear cache")?;
        if !summary.is_complete() {
            warn!(failed = summary.failed, "Some entries could not be removed");
        }
        writeln!(out, "removed {} failed {}", summary.removed, summary.failed)?;
        Ok(Outcome::Done)
    }

    fn handle_trim<W: Write>(&self, out: &mut W) -> Result<Outcome> {
        let report = self.cache.trim_report().context("Failed to trim cache")?;
        info!(
            target = report.target,
            reclaimed = report.reclaimed,
            "Manual trim finished"
        );
        writeln!(
            out,
            "reclaimed {} bytes from {} files",
            report.reclaimed,
            report.files_removed()
        )?;
        Ok(Outcome::Done)
    }

    fn handle_stats<W: Write>(&self, json: bool, out: &mut W) -> Result<Outcome> {
        self.cache
            .schedule_refresh()
            .context("Failed to schedule usage refresh")?;
        self.cache.wait_idle();

        let estimate = self.cache.usage_estimate();
        let report = StatsReport {
            dir: self.cache.base_dir().display().to_string(),
            entries: self.cache.cache_entry_count()?,
            disk_usage: estimate.disk_usage,
            free_space: estimate.free_space,
            max_disk_usage: self.cache.max_disk_usage(),
            target_size: desired_size(self.cache.max_disk_usage(), estimate.free_space),
        };

        if json {
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        } else {
            writeln!(out, "dir:            {}", report.dir)?;
            writeln!(out, "entries:        {}", report.entries)?;
            writeln!(out, "disk_usage:     {}", report.disk_usage)?;
            writeln!(out, "free_space:     {}", report.free_space)?;
            writeln!(out, "max_disk_usage: {}", report.max_disk_usage)?;
            writeln!(out, "target_size:    {}", report.target_size)?;
        }
        Ok(Outcome::Done)
    }

    fn handle_token<W: Write>(&self, key: &str, out: &mut W) -> Result<Outcome> {
        writeln!(out, "{}", self.cache.token_for(key))?;
        writeln!(out, "{}", self.cache.path_for(key).display())?;
        Ok(Outcome::Done)
    }
}
