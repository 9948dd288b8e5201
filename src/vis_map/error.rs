// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{
    antenna_groups::AntennaId,
    cf::{CfCacheError, CfKey},
    phase_grad::PhaseGradError,
};

/// A row whose CF couldn't be found. This is only fatal for the row.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Row {row}: no CF entry matches {key}")]
pub struct RowMiss {
    pub row: usize,
    pub key: CfKey,
}

#[derive(Error, Debug)]
pub enum PointingError {
    #[error("No pointing offset is known for antenna {0}")]
    UnknownAntenna(AntennaId),

    #[error("Pointing offset of antenna {ant} is not finite: {offset:?}")]
    NotFinite { ant: AntennaId, offset: [f64; 2] },
}

#[derive(Error, Debug)]
pub enum VisMapError {
    #[error(transparent)]
    Pointing(#[from] PointingError),

    #[error("Row {row} (antennas {ant1}-{ant2}) doesn't map to any baseline group; the antenna grouping doesn't cover its antennas")]
    UngroupedAntenna {
        row: usize,
        ant1: AntennaId,
        ant2: AntennaId,
    },

    #[error("Antenna {0} has no antenna type")]
    UnknownAntennaType(AntennaId),

    #[error(transparent)]
    PhaseGrad(#[from] PhaseGradError),

    #[error(transparent)]
    Cache(#[from] CfCacheError),
}
