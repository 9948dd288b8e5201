// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all CF-model-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("CF support size must be positive")]
    ZeroSupport,

    #[error("CF oversampling must be positive")]
    ZeroOversampling,

    #[error("CF has no frequencies")]
    NoFrequencies,

    #[error("CF has no Mueller elements")]
    NoMuellerElements,

    #[error("Mueller element {0} is invalid; elements are indices into a 4x4 matrix (0 to 15)")]
    BadMuellerElement(u32),

    #[error("Frequency {0} Hz is not positive")]
    BadFrequency(f64),

    #[error("Aperture width {width} for antenna type {ant_type} is not positive")]
    BadWidth { ant_type: u32, width: f64 },

    #[error("Axis ratio {0} must be in (0, 1]")]
    BadAxisRatio(f64),
}
