// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};

use crate::{
    cf::{ConvolutionFunctionCache, PaSelection},
    constants::DEFAULT_PA_TOLERANCE_DEG,
    CfCacheToolError,
};

#[derive(Parser, Debug, Default)]
pub(super) struct SummariseArgs {
    /// The directory containing the CF cache.
    #[clap(name = "CACHE_DIR", parse(from_os_str))]
    cache_dir: PathBuf,

    /// Read every entry's payload into memory, rather than only its metadata.
    #[clap(long)]
    eager: bool,

    /// Only consider entries near this parallactic angle [degrees]. Ignored if
    /// its magnitude is larger than 360.
    #[clap(long, allow_hyphen_values = true)]
    pa: Option<f64>,

    /// The parallactic-angle tolerance used with --pa [degrees].
    #[clap(long)]
    dpa: Option<f64>,
}

impl SummariseArgs {
    pub(super) fn run(self) -> Result<(), CfCacheToolError> {
        debug!("{:#?}", self);

        let Self {
            cache_dir,
            eager,
            pa,
            dpa,
        } = self;

        let selection = pa.map(|pa_deg| PaSelection {
            pa_deg,
            tolerance_deg: dpa.unwrap_or(DEFAULT_PA_TOLERANCE_DEG),
        });
        let cache = ConvolutionFunctionCache::open(&cache_dir, !eager, selection)?;
        cache.summarise();

        let num_filled = cache.entries().filter(|(_, e)| e.meta.filled).count();
        info!(
            "{} of {} entries are filled; {} bytes of payloads are in memory",
            num_filled,
            cache.len(),
            cache.mem_usage_bytes()
        );
        Ok(())
    }
}
