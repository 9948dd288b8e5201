// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseGradError {
    #[error("Baseline group {0} has no representative offsets; this is a bug")]
    UnknownBaselineGroup(usize),

    #[error("Can't make a phase gradient with a support size of 0")]
    ZeroSupport,

    #[error("Field {field_id} has a bad image geometry: {reason}")]
    BadField { field_id: usize, reason: String },
}
