// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fill pass: give blank CF entries their numeric content.
//!
//! The fill pass doesn't need the in-memory state of the process that created
//! the blank entries; everything is found on disk by entry name. Every entry
//! is independent, so they are filled in parallel.

use std::path::{Path, PathBuf};

use glob::glob;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use super::{io, CfCacheError, FillError};
use crate::{
    constants::{CF_DATA_EXT, CF_META_EXT},
    model::CfModel,
    PROGRESS_BARS,
};

/// Something that lists the CF entries matching a selection pattern.
pub trait CfSelector: Sync {
    /// Get the stems of the entries in `dir` matching `pattern`, sorted.
    fn select(&self, dir: &Path, pattern: &str) -> Result<Vec<String>, CfCacheError>;
}

/// Selects entries by globbing their metadata files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySelector;

impl CfSelector for DirectorySelector {
    fn select(&self, dir: &Path, pattern: &str) -> Result<Vec<String>, CfCacheError> {
        let full_pattern = dir.join(format!("{pattern}.{CF_META_EXT}"));
        let full_pattern = full_pattern.display().to_string();
        let paths = glob(&full_pattern).map_err(|source| CfCacheError::BadPattern {
            pattern: full_pattern.clone(),
            source,
        })?;

        let mut stems = vec![];
        for path in paths {
            match path {
                Ok(p) => {
                    if let Some(s) = p.file_stem().and_then(|s| s.to_str()) {
                        stems.push(s.to_string());
                    }
                }
                Err(e) => {
                    let path = e.path().to_path_buf();
                    return Err(CfCacheError::StorageUnavailable {
                        key: "(selection)".to_string(),
                        path,
                        source: e.into_error(),
                    });
                }
            }
        }
        stems.sort();
        Ok(stems)
    }
}

/// What happened during a fill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub filled: usize,
    /// Entries that were already filled (and overwriting wasn't allowed).
    pub skipped: usize,
    pub failed: usize,
}

enum FillOutcome {
    Filled,
    Skipped,
}

/// Fill every entry in `dir` that `selector` picks with `pattern`, using
/// `model`. Entries that are already filled are left alone unless
/// `overwrite` is set. Failures of individual entries are reported and
/// counted, but don't stop the others from being filled.
pub fn fill_from_list(
    dir: &Path,
    selector: &dyn CfSelector,
    pattern: &str,
    model: &dyn CfModel,
    overwrite: bool,
) -> Result<FillSummary, FillError> {
    let stems = selector.select(dir, pattern)?;
    if stems.is_empty() {
        return Err(FillError::EmptySelection {
            pattern: pattern.to_string(),
            dir: dir.to_path_buf(),
        });
    }
    info!(
        "Filling {} CF entries in '{}' with the {} model",
        stems.len(),
        dir.display(),
        model.get_model_type()
    );

    let pb = ProgressBar::with_draw_target(
        Some(stems.len() as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg}: [{wide_bar:.blue}] {pos:3}/{len:3} ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message("Filling CFs");

    // Every fill gets a serial newer than anything in the directory.
    let first_serial = io::max_serial(dir)?.map_or(0, |s| s + 1);
    let outcomes: Vec<Result<FillOutcome, FillError>> = stems
        .par_iter()
        .enumerate()
        .map(|(i, stem)| {
            let result = fill_one(dir, stem, model, overwrite, first_serial + i as u64);
            pb.inc(1);
            result
        })
        .collect();
    pb.abandon_with_message("Finished filling CFs");

    let mut summary = FillSummary::default();
    for (stem, outcome) in stems.iter().zip(outcomes) {
        match outcome {
            Ok(FillOutcome::Filled) => summary.filled += 1,
            Ok(FillOutcome::Skipped) => {
                debug!("'{stem}' is already filled; skipping");
                summary.skipped += 1;
            }
            Err(e) => {
                warn!("Couldn't fill '{stem}': {e}");
                summary.failed += 1;
            }
        }
    }
    info!(
        "Fill pass: {} filled, {} skipped, {} failed",
        summary.filled, summary.skipped, summary.failed
    );
    Ok(summary)
}

fn fill_one(
    dir: &Path,
    stem: &str,
    model: &dyn CfModel,
    overwrite: bool,
    serial: u64,
) -> Result<FillOutcome, FillError> {
    let meta_path: PathBuf = dir.join(format!("{stem}.{CF_META_EXT}"));
    let data_path: PathBuf = dir.join(format!("{stem}.{CF_DATA_EXT}"));

    let mut meta = io::read_metadata(&meta_path, stem)?;
    if meta.filled && !overwrite {
        return Ok(FillOutcome::Skipped);
    }

    let payload = model.fill(&meta).map_err(|source| FillError::Model {
        name: stem.to_string(),
        source,
    })?;
    let expected = meta.filled_shape();
    let (a, b, c, d) = payload.dim();
    if [a, b, c, d] != expected {
        return Err(CfCacheError::PayloadShape {
            key: meta.key().to_string(),
            expected,
            got: [a, b, c, d],
        }
        .into());
    }

    meta.filled = true;
    meta.shape = expected;
    meta.serial = serial;
    meta.provenance
        .insert("model".to_string(), model.get_model_type().to_string());

    let key = meta.key().to_string();
    io::write_payload(&data_path, &key, payload.view())?;
    io::write_metadata(&meta_path, &meta)?;
    Ok(FillOutcome::Filled)
}
