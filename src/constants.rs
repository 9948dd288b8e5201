// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. Offsets, angles and tolerances are
handled in double precision; only CF payloads and phase gradients are stored in
single precision.
 */

pub use std::f64::consts::{PI, TAU};

/// Arcseconds to radians.
pub const ARCSEC_TO_RAD: f64 = PI / (180.0 * 3600.0);

/// The default edge length of an antenna-grouping bin \[pixels\].
pub const DEFAULT_BIN_EDGE_PIX: f64 = 2.0;

/// If the user supplies a non-positive bin edge, this is used instead
/// \[pixels\].
pub const MIN_BIN_EDGE_PIX: f64 = 1e-3;

/// The default parallactic-angle tolerance used when creating CF entries
/// \[degrees\].
pub const DEFAULT_PA_TOLERANCE_DEG: f64 = 1.0;

/// A PA selection is only honoured if its magnitude is no larger than this
/// \[degrees\].
pub const MAX_SELECTABLE_PA_DEG: f64 = 360.0;

/// Extension of CF metadata files.
pub const CF_META_EXT: &str = "toml";

/// Extension of CF payload files.
pub const CF_DATA_EXT: &str = "cf";

/// The first bytes of every CF payload file.
pub const CF_DATA_MAGIC: &[u8; 8] = b"CFCACHE\0";

/// The version of the CF payload format.
pub const CF_DATA_VERSION: u32 = 1;
