// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Convolution-function cache and visibility-to-cache mapping for A-projection
imaging.

For every row of a visibility chunk, [`VisRowCfMapper`] finds the cached
convolution function (CF) to use and a per-baseline-group phase gradient that
corrects the CF for the pointing offsets of the row's antennas.
 */

pub mod antenna_groups;
pub mod baseline_groups;
pub mod cf;
mod cli;
pub mod constants;
pub(crate) mod math;
pub mod model;
pub mod params;
pub mod phase_grad;
pub mod vis_map;

// Re-exports.
pub use antenna_groups::{AntennaGrouper, AntennaGrouping, RegroupReason};
pub use baseline_groups::{BaselineGroupMap, BaselineGroupMapper, OffsetPair};
pub use cf::{
    fill_from_list, CfCacheError, CfEntry, CfHandle, CfKey, CfKind, CfMetadata, CfSelector,
    ConvolutionFunctionCache, DirectorySelector, FillError, PaSelection,
};
pub use cli::{CfCacheTool, CfCacheToolError};
pub use model::{CfModel, CfModelType, GaussianAperture, UnitKernel};
pub use params::{DriftCriterion, MapperParams};
pub use phase_grad::{FieldContext, NeedsRecompute, PhaseGradError, PhaseGradientCalculator};
pub use vis_map::{
    AntennaId, ChunkResolution, PointingOffsetProvider, ResolvedRow, RowMiss, StaticPointingOffsets,
    VisChunk, VisMapError, VisRow, VisRowCfMapper,
};

use crossbeam_utils::atomic::AtomicCell;

/// Single-precision complex numbers, the storage type of CF payloads and phase
/// gradients.
#[allow(non_camel_case_types)]
pub type c32 = num_complex::Complex<f32>;

/// Double-precision complex numbers.
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;

/// Are progress bars being drawn? This should only ever be enabled by CLI code.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
