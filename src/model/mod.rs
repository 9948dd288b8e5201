// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to give CF entries their numeric content.
//!
//! [`CfModel`] is a trait detailing how an antenna-response model produces the
//! payload of a CF entry. Models are only used by the fill pass; the cache and
//! the visibility mapper never evaluate them.

mod error;

pub use error::ModelError;

use indexmap::IndexMap;
use ndarray::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{c32, cf::CfMetadata};

/// Supported CF models.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq)]
pub enum CfModelType {
    /// An elliptical Gaussian aperture response.
    #[strum(serialize = "gaussian")]
    Gaussian,

    /// A delta function; i.e. an identity response.
    #[strum(serialize = "unit")]
    Unit,
}

/// A trait abstracting the models used to fill CF entries.
pub trait CfModel: Sync + Send {
    /// Get the type of model.
    fn get_model_type(&self) -> CfModelType;

    /// Check that this model can fill an entry with the given metadata.
    fn validate(&self, meta: &CfMetadata) -> Result<(), ModelError> {
        validate_metadata(meta)
    }

    /// Produce the payload for an entry. The returned array has the shape
    /// [`CfMetadata::filled_shape`] gives.
    fn fill(&self, meta: &CfMetadata) -> Result<Array4<c32>, ModelError>;
}

fn validate_metadata(meta: &CfMetadata) -> Result<(), ModelError> {
    if meta.support_size == 0 {
        return Err(ModelError::ZeroSupport);
    }
    if meta.oversampling == 0 {
        return Err(ModelError::ZeroOversampling);
    }
    if meta.freqs_hz.is_empty() {
        return Err(ModelError::NoFrequencies);
    }
    if let Some(&f) = meta.freqs_hz.iter().find(|f| !(**f > 0.0)) {
        return Err(ModelError::BadFrequency(f));
    }
    if meta.mueller_elements.is_empty() {
        return Err(ModelError::NoMuellerElements);
    }
    if let Some(&m) = meta.mueller_elements.iter().find(|m| **m > 15) {
        return Err(ModelError::BadMuellerElement(m));
    }
    Ok(())
}

/// Is this Mueller element on the diagonal of the 4x4 Mueller matrix?
fn is_diagonal(mueller_element: u32) -> bool {
    mueller_element % 5 == 0
}

/// Elliptical Gaussian aperture responses. Each antenna type has a width;
/// the response of a type pair uses the quadrature mean of the two widths,
/// grows linearly with frequency from the reference frequency and is rotated
/// by the parallactic angle.
#[derive(Debug, Clone)]
pub struct GaussianAperture {
    /// Widths (standard deviations) at the reference frequency \[oversampled
    /// CF pixels\], keyed by antenna type.
    pub widths_pix: IndexMap<u32, f64>,

    /// The width used for antenna types not in `widths_pix`.
    pub default_width_pix: f64,

    /// Minor over major axis.
    pub axis_ratio: f64,

    pub reference_freq_hz: f64,
}

impl GaussianAperture {
    pub fn new(default_width_pix: f64, axis_ratio: f64, reference_freq_hz: f64) -> GaussianAperture {
        GaussianAperture {
            widths_pix: IndexMap::new(),
            default_width_pix,
            axis_ratio,
            reference_freq_hz,
        }
    }

    fn width(&self, ant_type: u32) -> f64 {
        self.widths_pix
            .get(&ant_type)
            .copied()
            .unwrap_or(self.default_width_pix)
    }
}

impl CfModel for GaussianAperture {
    fn get_model_type(&self) -> CfModelType {
        CfModelType::Gaussian
    }

    fn validate(&self, meta: &CfMetadata) -> Result<(), ModelError> {
        validate_metadata(meta)?;
        if !(self.axis_ratio > 0.0 && self.axis_ratio <= 1.0) {
            return Err(ModelError::BadAxisRatio(self.axis_ratio));
        }
        for ant_type in [meta.ant_type1, meta.ant_type2] {
            let width = self.width(ant_type);
            if !(width > 0.0) {
                return Err(ModelError::BadWidth { ant_type, width });
            }
        }
        if !(self.reference_freq_hz > 0.0) {
            return Err(ModelError::BadFrequency(self.reference_freq_hz));
        }
        Ok(())
    }

    fn fill(&self, meta: &CfMetadata) -> Result<Array4<c32>, ModelError> {
        self.validate(meta)?;

        let w1 = self.width(meta.ant_type1);
        let w2 = self.width(meta.ant_type2);
        let base_width = ((w1 * w1 + w2 * w2) / 2.0).sqrt();
        let (s_pa, c_pa) = meta.parallactic_angle_deg.to_radians().sin_cos();
        let n = meta.support_size as usize;
        let centre = (n / 2) as f64;

        let mut payload = Array4::zeros(meta.filled_shape());
        for (mut per_mueller, &m) in payload
            .outer_iter_mut()
            .zip(meta.mueller_elements.iter())
        {
            if !is_diagonal(m) {
                continue;
            }
            for (mut plane, &freq) in per_mueller.outer_iter_mut().zip(meta.freqs_hz.iter()) {
                let major = base_width * freq / self.reference_freq_hz;
                let minor = major * self.axis_ratio;
                plane.indexed_iter_mut().for_each(|((iy, ix), v)| {
                    let x = ix as f64 - centre;
                    let y = iy as f64 - centre;
                    let xr = x * c_pa + y * s_pa;
                    let yr = -x * s_pa + y * c_pa;
                    let arg = xr * xr / (2.0 * major * major) + yr * yr / (2.0 * minor * minor);
                    *v = c32::new((-arg).exp() as f32, 0.0);
                });
            }
        }
        Ok(payload)
    }
}

/// Delta-function kernels. Every diagonal Mueller element is 1 at the centre
/// of the CF and 0 elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitKernel;

impl CfModel for UnitKernel {
    fn get_model_type(&self) -> CfModelType {
        CfModelType::Unit
    }

    fn fill(&self, meta: &CfMetadata) -> Result<Array4<c32>, ModelError> {
        self.validate(meta)?;

        let n = meta.support_size as usize;
        let mut payload = Array4::zeros(meta.filled_shape());
        for (i_m, &m) in meta.mueller_elements.iter().enumerate() {
            if is_diagonal(m) {
                payload
                    .slice_mut(s![i_m, .., n / 2, n / 2])
                    .fill(c32::new(1.0, 0.0));
            }
        }
        Ok(payload)
    }
}
