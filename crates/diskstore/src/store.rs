//! File store implementation
//!
//! Directory layout: every entry is one file directly under the base
//! directory, named `prefix + token + suffix`. Files that do not carry the
//! prefix and suffix belong to somebody else and are never touched.
//!
//! In-flight atomic writes live next to their target as
//! `<target>.~<pid>-<seq>.temp` and are never reported as entries.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hasher::KeyHasher;

/// Suffix carried by temporary files of in-flight atomic writes
pub const TEMP_SUFFIX: &str = ".temp";

/// Marker separating the target name from the temp discriminator
const TEMP_MARKER: &str = ".~";

/// Buffer size used when streaming into and out of entry files
const COPY_BUFFER_SIZE: usize = 8196 * 10;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A cache file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Full path of the file
    pub path: PathBuf,
    /// Length in bytes
    pub len: u64,
    /// Last-modified time (`UNIX_EPOCH` when the platform cannot report it)
    pub modified: SystemTime,
}

/// Outcome of [`FileStore::wipe`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeSummary {
    /// Files removed
    pub removed: usize,
    /// Files that could not be removed
    pub failed: usize,
}

impl WipeSummary {
    /// True when nothing failed
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Owns the cache directory and maps keys to files in it
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
    prefix: String,
    suffix: String,
    hasher: KeyHasher,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `path`
    ///
    /// # Arguments
    /// * `path` - Base directory; may be shared with unrelated files
    ///
    /// # Returns
    /// * `Result<FileStore>` - Store with no prefix, no suffix and SHA-1 tokens
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base = path.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;

        Ok(Self {
            base,
            prefix: String::new(),
            suffix: String::new(),
            hasher: KeyHasher::default(),
        })
    }

    /// Set the file name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the file name suffix
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Use a specific key hasher
    pub fn with_hasher(mut self, hasher: KeyHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Base directory
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// File name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// File name suffix
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Token for a key
    pub fn token_for<K: Display + ?Sized>(&self, key: &K) -> String {
        self.hasher.hash(key)
    }

    /// Path of the file backing `key`
    pub fn path_for<K: Display + ?Sized>(&self, key: &K) -> PathBuf {
        self.base.join(format!(
            "{}{}{}",
            self.prefix,
            self.hasher.hash(key),
            self.suffix
        ))
    }

    /// Does a file name belong to this store?
    pub fn file_name_matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name.ends_with(&self.suffix) && !is_temp_name(name)
    }

    /// Write an entry by handing the open file to `writer`
    ///
    /// The file is created or truncated in place. When `writer` or the final
    /// flush fails the partially written file is left behind for the caller
    /// to deal with.
    ///
    /// # Returns
    /// * `Result<u64>` - Length of the file after closing it
    pub fn write<K, F>(&self, key: &K, writer: F) -> Result<u64>
    where
        K: Display + ?Sized,
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let path = self.path_for(key);
        let file = File::create(&path)?;
        let mut out = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);

        writer(&mut out)?;

        let file = out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        let len = file.metadata()?.len();
        Ok(len)
    }

    /// Copy `source` into a temporary file next to the entry for `key`
    ///
    /// Nothing is visible under the entry's name until
    /// [`StagedFile::commit`]. If copying fails the temporary file and the
    /// existing entry are both removed.
    pub fn stage<K, R>(&self, key: &K, source: &mut R) -> Result<StagedFile>
    where
        K: Display + ?Sized,
        R: Read + ?Sized,
    {
        let target = self.path_for(key);
        let mut staged = StagedFile {
            temp: temp_path_for(&target),
            target,
            len: 0,
            committed: false,
        };

        match copy_into(&staged.temp, source) {
            Ok(len) => {
                staged.len = len;
                Ok(staged)
            }
            Err(e) => {
                staged.abort();
                Err(e)
            }
        }
    }

    /// Stage and commit in one step
    pub fn write_atomic<K, R>(&self, key: &K, source: &mut R) -> Result<u64>
    where
        K: Display + ?Sized,
        R: Read + ?Sized,
    {
        self.stage(key, source)?.commit()
    }

    /// Open the entry for reading; `None` when it does not exist
    pub fn open_reader<K: Display + ?Sized>(&self, key: &K) -> Result<Option<BufReader<File>>> {
        match File::open(self.path_for(key)) {
            Ok(file) => Ok(Some(BufReader::with_capacity(COPY_BUFFER_SIZE, file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the whole entry; `None` when it does not exist
    pub fn read<K: Display + ?Sized>(&self, key: &K) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.open_reader(key)? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    /// Does an entry exist for `key`?
    pub fn exists<K: Display + ?Sized>(&self, key: &K) -> bool {
        fs::metadata(self.path_for(key))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Current length of the entry for `key`, if any
    pub fn size_of<K: Display + ?Sized>(&self, key: &K) -> Result<Option<u64>> {
        match fs::metadata(self.path_for(key)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the entry for `key`
    ///
    /// # Returns
    /// * `Ok(None)` - Nothing to delete (counts as success)
    /// * `Ok(Some(len))` - Removed a file of `len` bytes
    pub fn delete<K: Display + ?Sized>(&self, key: &K) -> Result<Option<u64>> {
        self.delete_path(&self.path_for(key))
    }

    /// Delete a file by path, reporting the length it had when removed
    pub fn delete_path(&self, path: &Path) -> Result<Option<u64>> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match fs::remove_file(path) {
            Ok(()) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All files under the base directory that belong to this store
    ///
    /// Files whose metadata cannot be read are logged and skipped. A missing
    /// base directory is an empty store.
    pub fn list_entries(&self) -> Result<Vec<EntryMeta>> {
        let dir = match fs::read_dir(&self.base) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.base.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.file_name_matches(name) {
                continue;
            }

            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping cache file without metadata");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }

            entries.push(EntryMeta {
                len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }

        Ok(entries)
    }

    /// Delete every file that belongs to this store
    ///
    /// A file that cannot be removed is logged and counted; the rest are
    /// still removed.
    pub fn wipe(&self) -> Result<WipeSummary> {
        let mut summary = WipeSummary::default();

        for entry in self.list_entries()? {
            match fs::remove_file(&entry.path) {
                Ok(()) => summary.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Error deleting cache file");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            dir = %self.base.display(),
            removed = summary.removed,
            failed = summary.failed,
            "Wiped cache files"
        );
        Ok(summary)
    }

    /// Total bytes of all entries, from a live scan
    pub fn disk_usage(&self) -> Result<u64> {
        Ok(self.list_entries()?.iter().map(|e| e.len).sum())
    }

    /// Number of entries, from a live scan
    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.list_entries()?.len())
    }
}

/// A fully written temporary file waiting to replace its target
///
/// Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    len: u64,
    committed: bool,
}

impl StagedFile {
    /// Bytes written to the temporary file
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the source was empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path the file will be committed to
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the temporary file into place
    ///
    /// Readers see either the previous file, no file, or the complete new
    /// one. On failure both the temporary file and the target are removed.
    pub fn commit(mut self) -> Result<u64> {
        if fs::rename(&self.temp, &self.target).is_err() {
            // Some platforms refuse to rename over an existing file.
            if let Err(e) = remove_if_present(&self.target) {
                self.abort();
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&self.temp, &self.target) {
                self.abort();
                return Err(e.into());
            }
        }

        self.committed = true;
        Ok(self.len)
    }

    fn abort(&mut self) {
        for path in [&self.temp, &self.target] {
            if let Err(e) = remove_if_present(path) {
                warn!(path = %path.display(), error = %e, "Failed to clean up after aborted write");
            }
        }
        self.committed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = remove_if_present(&self.temp);
        }
    }
}

fn copy_into<R: Read + ?Sized>(path: &Path, source: &mut R) -> Result<u64> {
    let file = File::create(path)?;
    let mut out = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
    let len = io::copy(source, &mut out)?;
    out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    Ok(len)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn temp_path_for(target: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = target.as_os_str().to_os_string();
    name.push(format!("{}{}-{}{}", TEMP_MARKER, process::id(), seq, TEMP_SUFFIX));
    PathBuf::from(name)
}

fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX) && name.contains(TEMP_MARKER)
}
