// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all cfcache-tool errors. This should be the *only* error
//! enum of the CLI that is publicly visible.

use thiserror::Error;

use super::{dry_run::DryRunArgsError, fill::FillArgsError};
use crate::{
    cf::{CfCacheError, FillError},
    model::ModelError,
};

/// The *only* publicly visible error from the `cfcache` tool. Each message
/// comes with a hint, unless it's "generic".
#[derive(Error, Debug)]
pub enum CfCacheToolError {
    /// An error reading or writing the CF cache.
    #[error("{0}\n\nCheck that the cache directory exists and that its entries were written by this tool.")]
    Cache(String),

    /// An error related to the fill pass.
    #[error("{0}\n\nEntries are selected by globbing their names; run the 'summarise' subcommand to list them.")]
    Fill(String),

    /// An error related to CF models.
    #[error("{0}\n\nThe model parameters or the metadata of the entry being filled are invalid.")]
    Model(String),

    /// An error related to the arguments of a subcommand.
    #[error("{0}")]
    Args(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files are TOML or JSON files with the same keys as the long CLI flags (with underscores).")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<CfCacheError> for CfCacheToolError {
    fn from(e: CfCacheError) -> Self {
        let s = e.to_string();
        match e {
            CfCacheError::BadPattern { .. } => Self::Fill(s),
            CfCacheError::MetadataEncode { .. } => Self::Generic(s),
            _ => Self::Cache(s),
        }
    }
}

impl From<FillError> for CfCacheToolError {
    fn from(e: FillError) -> Self {
        match e {
            FillError::EmptySelection { .. } => Self::Fill(e.to_string()),
            FillError::Model { .. } => Self::Model(e.to_string()),
            FillError::Cache(e) => Self::from(e),
        }
    }
}

impl From<ModelError> for CfCacheToolError {
    fn from(e: ModelError) -> Self {
        Self::Model(e.to_string())
    }
}

impl From<DryRunArgsError> for CfCacheToolError {
    fn from(e: DryRunArgsError) -> Self {
        Self::Args(e.to_string())
    }
}

impl From<FillArgsError> for CfCacheToolError {
    fn from(e: FillArgsError) -> Self {
        Self::Args(e.to_string())
    }
}

impl From<std::io::Error> for CfCacheToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<toml::ser::Error> for CfCacheToolError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Generic(format!("Couldn't serialise arguments to toml: {e}"))
    }
}
