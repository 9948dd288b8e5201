// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with the convolution-function cache.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfCacheError {
    #[error("Got an empty path for the CF cache directory")]
    EmptyCacheDir,

    #[error("CF cache directory '{dir}' exists but is not a readable and writable directory")]
    BadCacheDir { dir: PathBuf },

    #[error("Couldn't create CF cache directory '{dir}': {source}")]
    CreateCacheDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage for CF {key} is unavailable ('{path}'): {source}")]
    StorageUnavailable {
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CF {key} in '{path}' is corrupt: {reason}")]
    CorruptEntry {
        key: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Refusing to overwrite the existing CF file '{path}'; an explicit overwrite is required")]
    WouldOverwrite { path: PathBuf },

    #[error("The payload for CF {key} has shape {got:?}, but its metadata expects {expected:?}")]
    PayloadShape {
        key: String,
        expected: [usize; 4],
        got: [usize; 4],
    },

    #[error("No CF entry has handle {0}")]
    UnknownHandle(usize),

    #[error("CF {key} has no payload in memory and nowhere to read one from")]
    NoPayload { key: String },

    #[error("Couldn't serialise the metadata of CF {key}: {source}")]
    MetadataEncode {
        key: String,
        source: toml::ser::Error,
    },

    #[error("Invalid CF selection pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

#[derive(Error, Debug)]
pub enum FillError {
    #[error("The selection pattern '{pattern}' matched no CF entries in '{dir}'; refusing to continue with nothing to fill")]
    EmptySelection { pattern: String, dir: PathBuf },

    #[error("CF model error for '{name}': {source}")]
    Model {
        name: String,
        source: crate::model::ModelError,
    },

    #[error(transparent)]
    Cache(#[from] CfCacheError),
}
