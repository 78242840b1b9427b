//! # diskstore
//!
//! One-file-per-entry storage for disk caches.
//!
//! ## Layout
//! - Each key is hashed (SHA-1 by default) into a hex token
//! - The entry lives at `base/prefix + token + suffix`
//! - Files without the prefix/suffix are left alone, so the base directory
//!   can be shared
//!
//! ## Guarantees
//! - `write_atomic` goes through a temporary file and a rename, so readers
//!   never observe a half-written entry
//! - A missing file is a miss, never an error

#![warn(missing_docs)]

mod error;
mod hasher;
mod store;

pub use error::{CodecError, Error, Result};
pub use hasher::{DigestAlgorithm, KeyHasher};
pub use store::{EntryMeta, FileStore, StagedFile, WipeSummary, TEMP_SUFFIX};
