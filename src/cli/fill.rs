// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{parse_type_width, ARG_FILE_HELP, CF_MODEL_HELP, CF_MODEL_TYPES_COMMA_SEPARATED};
use crate::{
    cf::{fill_from_list, DirectorySelector},
    model::{CfModel, CfModelType, GaussianAperture, UnitKernel},
    CfCacheToolError,
};

const DEFAULT_PATTERN: &str = "*";
const DEFAULT_WIDTH_PIX: f64 = 4.0;
const DEFAULT_REFERENCE_FREQ_HZ: f64 = 150e6;

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct FillArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    #[serde(skip)]
    pub(super) args_file: Option<PathBuf>,

    /// The directory containing the blank CF entries.
    #[clap(short = 'd', long)]
    pub(super) cache_dir: Option<PathBuf>,

    /// A glob pattern selecting the entries to fill, matched against entry
    /// names (e.g. "CFS_0_1_*"). Default: "*".
    #[clap(short, long)]
    pub(super) pattern: Option<String>,

    #[clap(short, long, help = CF_MODEL_HELP.as_str())]
    pub(super) model: Option<String>,

    /// The Gaussian aperture width used for antenna types without their own
    /// width [oversampled pixels]. Default: 4.
    #[clap(long)]
    pub(super) width_pix: Option<f64>,

    /// Gaussian aperture widths of specific antenna types, e.g. "1=6.5"
    /// [oversampled pixels].
    #[clap(long, multiple_values(true))]
    pub(super) type_widths: Option<Vec<String>>,

    /// The ratio of the minor to major axis of the Gaussian aperture. Default:
    /// 1.
    #[clap(long)]
    pub(super) axis_ratio: Option<f64>,

    /// The frequency at which the Gaussian widths apply [Hz]. Default: 150e6.
    #[clap(long)]
    pub(super) reference_freq_hz: Option<f64>,

    /// Refill entries that are already filled.
    #[clap(long)]
    #[serde(default)]
    pub(super) overwrite: bool,
}

impl FillArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    pub(super) fn merge(self) -> Result<FillArgs, CfCacheToolError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let FillArgs {
                args_file: _,
                cache_dir,
                pattern,
                model,
                width_pix,
                type_widths,
                axis_ratio,
                reference_freq_hz,
                overwrite,
            } = unpack_arg_file!(arg_file);

            Ok(FillArgs {
                args_file: None,
                cache_dir: cli_args.cache_dir.or(cache_dir),
                pattern: cli_args.pattern.or(pattern),
                model: cli_args.model.or(model),
                width_pix: cli_args.width_pix.or(width_pix),
                type_widths: cli_args.type_widths.or(type_widths),
                axis_ratio: cli_args.axis_ratio.or(axis_ratio),
                reference_freq_hz: cli_args.reference_freq_hz.or(reference_freq_hz),
                overwrite: cli_args.overwrite || overwrite,
            })
        } else {
            Ok(cli_args)
        }
    }

    /// Make the CF model these arguments describe.
    pub(super) fn parse_model(&self) -> Result<Box<dyn CfModel>, FillArgsError> {
        let model_type = match self.model.as_deref() {
            None => CfModelType::Gaussian,
            Some(s) => CfModelType::from_str(&s.to_lowercase())
                .map_err(|_| FillArgsError::UnknownModel(s.to_string()))?,
        };

        match model_type {
            CfModelType::Unit => Ok(Box::new(UnitKernel)),
            CfModelType::Gaussian => {
                let mut model = GaussianAperture::new(
                    self.width_pix.unwrap_or(DEFAULT_WIDTH_PIX),
                    self.axis_ratio.unwrap_or(1.0),
                    self.reference_freq_hz.unwrap_or(DEFAULT_REFERENCE_FREQ_HZ),
                );
                for s in self.type_widths.iter().flatten() {
                    let (ant_type, width) =
                        parse_type_width(s).ok_or_else(|| FillArgsError::BadTypeWidth(s.clone()))?;
                    model.widths_pix.insert(ant_type, width);
                }
                Ok(Box::new(model))
            }
        }
    }

    pub(super) fn run(self) -> Result<(), CfCacheToolError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);

        let model = self.parse_model()?;
        let cache_dir = self.cache_dir.ok_or(FillArgsError::NoCacheDir)?;
        let pattern = self.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);

        let summary = fill_from_list(
            &cache_dir,
            &DirectorySelector,
            pattern,
            model.as_ref(),
            self.overwrite,
        )?;
        info!(
            "Filled {} entries; skipped {} already-filled entries",
            summary.filled, summary.skipped
        );
        if summary.failed > 0 {
            return Err(CfCacheToolError::Fill(format!(
                "{} of {} selected entries couldn't be filled",
                summary.failed,
                summary.filled + summary.skipped + summary.failed
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub(super) enum FillArgsError {
    #[error("No cache directory was specified")]
    NoCacheDir,

    #[error("Unknown CF model '{0}'; supported models: {models}", models = *CF_MODEL_TYPES_COMMA_SEPARATED)]
    UnknownModel(String),

    #[error("Couldn't parse antenna-type width '{0}'; expected something like '1=6.5'")]
    BadTypeWidth(String),
}
