// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tunables of the visibility-to-cache mapping.
//!
//! All fields have defaults, so a parameter file only needs to list what it
//! changes.


use log::warn;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::{
    ARCSEC_TO_RAD, DEFAULT_BIN_EDGE_PIX, DEFAULT_PA_TOLERANCE_DEG, MIN_BIN_EDGE_PIX,
};

/// How antenna pointing drift is measured against the cached grouping.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftCriterion {
    /// The mean of the per-antenna residual distances must stay below the
    /// threshold.
    #[strum(serialize = "mean")]
    #[serde(rename = "mean")]
    Mean,

    /// Every antenna's residual distance must stay below the threshold.
    #[strum(serialize = "per-antenna")]
    #[serde(rename = "per-antenna")]
    PerAntenna,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperParams {
    /// Apply per-baseline-group pointing corrections. If false, all rows share
    /// one phase gradient with no pointing offset.
    pub do_pointing: bool,

    /// Edge length of the square bins used to group antennas by pointing
    /// offset \[pixels\].
    pub bin_edge_pix: f64,

    /// The mean residual pointing drift that forces a regrouping
    /// \[arcseconds\]. Zero means "the bin edge, converted to an angle".
    pub drift_threshold_arcsec: f64,

    /// How drift is measured.
    pub drift_criterion: DriftCriterion,

    /// The parallactic-angle tolerance given to new CF entries \[degrees\].
    pub pa_tolerance_deg: f64,

    /// Only read CF metadata when opening a cache; payloads are read on first
    /// use.
    pub lazy_fill: bool,

    /// Allow blank CF entries made for missed rows to replace files that are
    /// already on disk.
    pub overwrite: bool,
}

impl Default for MapperParams {
    fn default() -> Self {
        MapperParams {
            do_pointing: true,
            bin_edge_pix: DEFAULT_BIN_EDGE_PIX,
            drift_threshold_arcsec: 0.0,
            drift_criterion: DriftCriterion::Mean,
            pa_tolerance_deg: DEFAULT_PA_TOLERANCE_DEG,
            lazy_fill: true,
            overwrite: false,
        }
    }
}

impl MapperParams {
    /// The bin edge to actually use. Non-positive (or non-finite) values are
    /// replaced with [`MIN_BIN_EDGE_PIX`].
    pub fn effective_bin_edge_pix(&self) -> f64 {
        sanitise_bin_edge(self.bin_edge_pix)
    }

    /// The drift threshold to actually use \[radians\]. `pixel_scale_rad` is
    /// the angular size of an image pixel.
    pub fn effective_drift_threshold_rad(&self, pixel_scale_rad: f64) -> f64 {
        if self.drift_threshold_arcsec > 0.0 {
            self.drift_threshold_arcsec * ARCSEC_TO_RAD
        } else {
            self.effective_bin_edge_pix() * pixel_scale_rad
        }
    }
}

/// Replace an unusable bin edge with [`MIN_BIN_EDGE_PIX`].
pub(crate) fn sanitise_bin_edge(bin_edge_pix: f64) -> f64 {
    if bin_edge_pix.is_finite() && bin_edge_pix > 0.0 {
        bin_edge_pix
    } else {
        warn!(
            "Antenna grouping bin edge {bin_edge_pix} is not positive; using {MIN_BIN_EDGE_PIX} pixels"
        );
        MIN_BIN_EDGE_PIX
    }
}
