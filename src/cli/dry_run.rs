// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Create blank CF entries on disk.
//!
//! One entry is made for every combination of parallactic angle and
//! antenna-type pair, for each requested kind. Only metadata (and a
//! single-sample placeholder payload) is written; the `fill` subcommand gives
//! the entries their content later.

use std::path::PathBuf;

use clap::Parser;
use itertools::iproduct;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{parse_type_pair, ARG_FILE_HELP};
use crate::{
    cf::{CfKind, CfMetadata, ConvolutionFunctionCache},
    constants::DEFAULT_PA_TOLERANCE_DEG,
    CfCacheToolError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct DryRunArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    #[serde(skip)]
    pub(super) args_file: Option<PathBuf>,

    /// The directory to put CF entries in. It is created if it doesn't exist.
    #[clap(short = 'd', long)]
    pub(super) cache_dir: Option<PathBuf>,

    /// The parallactic angles to make entries for [degrees].
    #[clap(long, multiple_values(true), allow_hyphen_values = true)]
    pub(super) pas_deg: Option<Vec<f64>>,

    /// The parallactic-angle tolerance of the new entries [degrees]. Default:
    /// 1.
    #[clap(long)]
    pub(super) pa_tolerance_deg: Option<f64>,

    /// The antenna-type pairs to make entries for, e.g. "0-0 0-1 1-1".
    /// Default: 0-0.
    #[clap(long, multiple_values(true))]
    pub(super) ant_type_pairs: Option<Vec<String>>,

    /// The Mueller elements held by each entry (0-15, row major). Default: 0
    /// 5 10 15.
    #[clap(long, multiple_values(true))]
    pub(super) mueller_elements: Option<Vec<u32>>,

    /// The frequencies held by each entry [Hz].
    #[clap(long, multiple_values(true))]
    pub(super) freqs_hz: Option<Vec<f64>>,

    /// The oversampling factor of the entries. Default: 20.
    #[clap(long)]
    pub(super) oversampling: Option<u32>,

    /// The support size of the entries [oversampled pixels].
    #[clap(long)]
    pub(super) support_size: Option<u32>,

    /// Also create weighting-function (WTCFS) entries.
    #[clap(long)]
    #[serde(default)]
    pub(super) weights: bool,

    /// Replace entries that already exist on disk.
    #[clap(long)]
    #[serde(default)]
    pub(super) overwrite: bool,
}

impl DryRunArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<DryRunArgs, CfCacheToolError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let DryRunArgs {
                args_file: _,
                cache_dir,
                pas_deg,
                pa_tolerance_deg,
                ant_type_pairs,
                mueller_elements,
                freqs_hz,
                oversampling,
                support_size,
                weights,
                overwrite,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(DryRunArgs {
                args_file: None,
                cache_dir: cli_args.cache_dir.or(cache_dir),
                pas_deg: cli_args.pas_deg.or(pas_deg),
                pa_tolerance_deg: cli_args.pa_tolerance_deg.or(pa_tolerance_deg),
                ant_type_pairs: cli_args.ant_type_pairs.or(ant_type_pairs),
                mueller_elements: cli_args.mueller_elements.or(mueller_elements),
                freqs_hz: cli_args.freqs_hz.or(freqs_hz),
                oversampling: cli_args.oversampling.or(oversampling),
                support_size: cli_args.support_size.or(support_size),
                weights: cli_args.weights || weights,
                overwrite: cli_args.overwrite || overwrite,
            })
        } else {
            Ok(cli_args)
        }
    }

    /// Turn the arguments into the metadata of every entry to be created, and
    /// the directory they go in.
    pub(super) fn parse(self) -> Result<(PathBuf, Vec<CfMetadata>), DryRunArgsError> {
        let Self {
            args_file: _,
            cache_dir,
            pas_deg,
            pa_tolerance_deg,
            ant_type_pairs,
            mueller_elements,
            freqs_hz,
            oversampling,
            support_size,
            weights,
            overwrite: _,
        } = self;

        let cache_dir = cache_dir.ok_or(DryRunArgsError::NoCacheDir)?;
        let pas_deg = match pas_deg {
            Some(p) if !p.is_empty() => p,
            _ => return Err(DryRunArgsError::NoPas),
        };
        if let Some(&pa) = pas_deg.iter().find(|pa| !pa.is_finite()) {
            return Err(DryRunArgsError::BadPa(pa));
        }
        let pa_tolerance_deg = pa_tolerance_deg.unwrap_or(DEFAULT_PA_TOLERANCE_DEG);
        if !(pa_tolerance_deg >= 0.0) {
            return Err(DryRunArgsError::BadTolerance(pa_tolerance_deg));
        }

        let type_pairs = match ant_type_pairs {
            None => vec![(0, 0)],
            Some(pairs) => pairs
                .iter()
                .map(|s| parse_type_pair(s).ok_or_else(|| DryRunArgsError::BadTypePair(s.clone())))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mueller_elements = mueller_elements.unwrap_or_else(|| vec![0, 5, 10, 15]);
        if mueller_elements.is_empty() {
            return Err(DryRunArgsError::NoMuellerElements);
        }
        if let Some(&m) = mueller_elements.iter().find(|m| **m > 15) {
            return Err(DryRunArgsError::BadMuellerElement(m));
        }

        let freqs_hz = match freqs_hz {
            Some(f) if !f.is_empty() => f,
            _ => return Err(DryRunArgsError::NoFreqs),
        };
        if let Some(&f) = freqs_hz.iter().find(|f| !(**f > 0.0)) {
            return Err(DryRunArgsError::BadFreq(f));
        }

        let oversampling = oversampling.unwrap_or(20);
        if oversampling == 0 {
            return Err(DryRunArgsError::ZeroOversampling);
        }
        let support_size = match support_size {
            None => return Err(DryRunArgsError::NoSupport),
            Some(0) => return Err(DryRunArgsError::ZeroSupport),
            Some(s) => s,
        };

        let kinds: &[CfKind] = if weights {
            &[CfKind::Cf, CfKind::WeightCf]
        } else {
            &[CfKind::Cf]
        };

        let metas = iproduct!(kinds.iter(), pas_deg.iter(), type_pairs.iter())
            .map(|(&kind, &pa, &(t1, t2))| {
                let mut meta = CfMetadata::new(
                    kind,
                    pa,
                    pa_tolerance_deg,
                    t1,
                    t2,
                    mueller_elements.clone(),
                    freqs_hz.clone(),
                    oversampling,
                    support_size,
                );
                meta.provenance
                    .insert("created_by".to_string(), "cfcache dry-run".to_string());
                meta
            })
            .collect();

        Ok((cache_dir, metas))
    }

    pub(super) fn run(self) -> Result<(), CfCacheToolError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let overwrite = self.overwrite;
        let (cache_dir, metas) = self.parse()?;

        let mut cache = ConvolutionFunctionCache::new(&cache_dir)?;
        for meta in metas {
            let handle = cache.create_blank(meta);
            cache.persist(handle, overwrite)?;
        }
        info!(
            "Created {} blank CF entries in '{}'",
            cache.len(),
            cache_dir.display()
        );
        cache.summarise();
        Ok(())
    }
}

#[derive(Error, Debug)]
pub(super) enum DryRunArgsError {
    #[error("No cache directory was specified")]
    NoCacheDir,

    #[error("No parallactic angles were specified")]
    NoPas,

    #[error("Parallactic angle '{0}' is not a finite number")]
    BadPa(f64),

    #[error("The parallactic-angle tolerance must be non-negative; got '{0}'")]
    BadTolerance(f64),

    #[error("Couldn't parse antenna-type pair '{0}'; expected something like '0-1'")]
    BadTypePair(String),

    #[error("No Mueller elements were specified")]
    NoMuellerElements,

    #[error("Mueller element {0} is not between 0 and 15")]
    BadMuellerElement(u32),

    #[error("No frequencies were specified")]
    NoFreqs,

    #[error("Frequency '{0}' Hz is not positive")]
    BadFreq(f64),

    #[error("The oversampling factor must be positive")]
    ZeroOversampling,

    #[error("No support size was specified")]
    NoSupport,

    #[error("The support size must be positive")]
    ZeroSupport,
}
