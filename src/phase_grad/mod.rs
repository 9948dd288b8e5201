// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Phase gradients correcting CFs for pointing offsets.

A phase gradient is a complex array the size of a CF. The element `(iy, ix)`
of the gradient for an offset `(ox, oy)` \[pixels\] is

`exp(i (gx (ix - N/2) + gy (iy - N/2)))`, with `gx = -2π ox / (nx s)` and
`gy = -2π oy / (ny s)`,

where `N` is the CF support, `(nx, ny)` is the image size and `s` is the CF
oversampling. A baseline group corrects for the mean of its two antenna
groups' representative offsets.
 */

mod error;

pub use error::PhaseGradError;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use ndarray::prelude::*;

use crate::{baseline_groups::OffsetPair, c32, constants::TAU, math::cexp};

/// The image geometry phase gradients are made for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldContext {
    pub field_id: usize,
    /// `[nx, ny]` \[pixels\].
    pub image_size: [usize; 2],
    pub oversampling: u32,
    /// The angular size of an image pixel along x and y \[radians\]. Signs
    /// follow the image axes.
    pub pixel_increment_rad: [f64; 2],
}

impl FieldContext {
    /// The angle corresponding to one pixel \[radians\].
    pub fn pixel_scale_rad(&self) -> f64 {
        self.pixel_increment_rad[0].abs()
    }

    fn validate(&self) -> Result<(), PhaseGradError> {
        let bad = |reason: &str| PhaseGradError::BadField {
            field_id: self.field_id,
            reason: reason.to_string(),
        };
        if self.image_size.contains(&0) {
            return Err(bad("image size has a zero dimension"));
        }
        if self.oversampling == 0 {
            return Err(bad("oversampling is 0"));
        }
        Ok(())
    }
}

/// The conditions under which a stored gradient can't be reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeedsRecompute {
    /// The baseline group's offsets have changed.
    pub pointing: bool,
    /// The field has changed.
    pub field: bool,
}

impl NeedsRecompute {
    pub fn any(self) -> bool {
        self.pointing || self.field
    }
}

/// Compute the phase gradient for an offset pair. This is a pure function.
pub fn phase_gradient(
    pair: &OffsetPair,
    field: &FieldContext,
    support: usize,
) -> Result<Array2<c32>, PhaseGradError> {
    if support == 0 {
        return Err(PhaseGradError::ZeroSupport);
    }
    field.validate()?;

    let [ox, oy] = pair.mean();
    let s = f64::from(field.oversampling);
    let gx = -TAU * ox / (field.image_size[0] as f64 * s);
    let gy = -TAU * oy / (field.image_size[1] as f64 * s);
    let centre = (support / 2) as f64;

    // Separable: exp(i(a + b)) = exp(ia) exp(ib).
    let x_phases: Vec<_> = (0..support)
        .map(|ix| cexp(gx * (ix as f64 - centre)))
        .collect();
    let y_phases: Vec<_> = (0..support)
        .map(|iy| cexp(gy * (iy as f64 - centre)))
        .collect();
    Ok(Array2::from_shape_fn((support, support), |(iy, ix)| {
        let v = y_phases[iy] * x_phases[ix];
        c32::new(v.re as f32, v.im as f32)
    }))
}

/// Keeps one phase gradient per baseline group, recomputing only when asked
/// to.
#[derive(Debug, Default)]
pub struct PhaseGradientCalculator {
    grads: HashMap<usize, Arc<Array2<c32>>>,
    num_computed: usize,
}

impl PhaseGradientCalculator {
    pub fn new() -> PhaseGradientCalculator {
        PhaseGradientCalculator::default()
    }

    /// Compute and store the gradient of baseline group `id`. `pair` is `None`
    /// if the group has no representative offsets, which is an error.
    pub fn compute(
        &mut self,
        id: usize,
        pair: Option<&OffsetPair>,
        field: &FieldContext,
        support: usize,
    ) -> Result<Arc<Array2<c32>>, PhaseGradError> {
        let pair = pair.ok_or(PhaseGradError::UnknownBaselineGroup(id))?;
        let grad = Arc::new(phase_gradient(pair, field, support)?);
        trace!(
            "Computed phase gradient for baseline group {id} (offset {:?} px, support {support})",
            pair.mean()
        );
        self.grads.insert(id, Arc::clone(&grad));
        self.num_computed += 1;
        Ok(grad)
    }

    /// Get the stored gradient of baseline group `id`, unless it is missing,
    /// `needs` says it's stale or it's the wrong size; then compute it.
    pub fn get_or_compute(
        &mut self,
        id: usize,
        pair: Option<&OffsetPair>,
        field: &FieldContext,
        support: usize,
        needs: NeedsRecompute,
    ) -> Result<Arc<Array2<c32>>, PhaseGradError> {
        if !needs.any() {
            if let Some(grad) = self.grads.get(&id) {
                if grad.dim() == (support, support) {
                    return Ok(Arc::clone(grad));
                }
                debug!(
                    "Phase gradient of baseline group {id} has support {}, but {support} is needed",
                    grad.nrows()
                );
            }
        }
        self.compute(id, pair, field, support)
    }

    pub fn get(&self, id: usize) -> Option<&Arc<Array2<c32>>> {
        self.grads.get(&id)
    }

    /// Drop every stored gradient.
    pub fn invalidate_all(&mut self) {
        self.grads.clear();
    }

    /// How many gradients have been computed over the lifetime of this
    /// calculator.
    pub fn num_computed(&self) -> usize {
        self.num_computed
    }

    pub fn num_stored(&self) -> usize {
        self.grads.len()
    }
}
