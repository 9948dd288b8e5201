// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Resolving visibility rows to CFs and phase gradients.

[`VisRowCfMapper`] is called once per visibility chunk. It regroups antennas
if the chunk invalidates the previous grouping, maps every row to a baseline
group, then gives every row the CF entry matching its parallactic angle and
antenna types along with its baseline group's phase gradient. Groupings,
gradients and CF entries are all kept for the next chunk.
 */

mod error;

pub use crate::antenna_groups::AntennaId;
pub use error::*;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info, trace};
use ndarray::prelude::*;

use crate::{
    antenna_groups::{AntennaGrouper, RegroupReason},
    baseline_groups::{BaselineGroupMap, BaselineGroupMapper},
    c32,
    cf::{CfCacheError, CfHandle, CfKey, CfKind, CfMetadata, ConvolutionFunctionCache},
    params::MapperParams,
    phase_grad::{FieldContext, NeedsRecompute, PhaseGradError, PhaseGradientCalculator},
};

/// The parts of a visibility row needed here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisRow {
    pub ant1: AntennaId,
    pub ant2: AntennaId,
    pub parallactic_angle_deg: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisChunk {
    pub field_id: usize,
    pub rows: Vec<VisRow>,
    /// The frequencies of the chunk's channels \[Hz\].
    pub freqs_hz: Vec<f64>,
}

impl VisChunk {
    /// The distinct antennas of this chunk, ascending.
    pub fn antennas(&self) -> BTreeSet<AntennaId> {
        self.rows.iter().flat_map(|r| [r.ant1, r.ant2]).collect()
    }
}

/// Something that knows the pointing offsets of antennas.
pub trait PointingOffsetProvider {
    /// Get the pointing offset of every antenna in `chunk` \[image pixels,
    /// relative to the phase centre\].
    fn offsets(&self, chunk: &VisChunk) -> Result<IndexMap<AntennaId, [f64; 2]>, PointingError>;
}

/// Pointing offsets that don't change over time.
#[derive(Debug, Clone, Default)]
pub struct StaticPointingOffsets {
    pub offsets: IndexMap<AntennaId, [f64; 2]>,
}

impl PointingOffsetProvider for StaticPointingOffsets {
    fn offsets(&self, chunk: &VisChunk) -> Result<IndexMap<AntennaId, [f64; 2]>, PointingError> {
        chunk
            .antennas()
            .into_iter()
            .map(|ant| match self.offsets.get(&ant) {
                None => Err(PointingError::UnknownAntenna(ant)),
                Some(o) if !(o[0].is_finite() && o[1].is_finite()) => {
                    Err(PointingError::NotFinite { ant, offset: *o })
                }
                Some(o) => Ok((ant, *o)),
            })
            .collect()
    }
}

/// A row with everything the gridder needs.
#[derive(Debug, Clone)]
pub struct ResolvedRow {
    /// The CF entry to use. It may still need to be materialised.
    pub cf: CfHandle,
    pub baseline_group: usize,
    /// Sized to [`ChunkResolution::max_cf_size`].
    pub phase_grad: Arc<Array2<c32>>,
}

/// The result of resolving a chunk.
#[derive(Debug, Clone)]
pub struct ChunkResolution {
    /// One entry per row of the chunk, in order.
    pub rows: Vec<Result<ResolvedRow, RowMiss>>,
    /// Why the antennas were regrouped for this chunk, if they were.
    pub regrouped: Option<RegroupReason>,
    /// For every CF used, the index of the CF frequency nearest to each of
    /// the chunk's channels.
    pub chan_maps: IndexMap<CfHandle, Vec<usize>>,
    /// The largest support of the CFs used. Phase gradients have this size.
    pub max_cf_size: usize,
    /// How many phase gradients had to be computed for this chunk.
    pub num_grads_computed: usize,
}

impl ChunkResolution {
    pub fn num_resolved(&self) -> usize {
        self.rows.iter().filter(|r| r.is_ok()).count()
    }

    pub fn misses(&self) -> impl Iterator<Item = &RowMiss> {
        self.rows.iter().filter_map(|r| r.as_ref().err())
    }
}

/// Where the mapper is in handling a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    ChunkStart,
    /// The previous grouping is reused.
    GroupingValid,
    /// The previous grouping is stale.
    Regroup,
    RowMap,
    PerRowResolve,
    ChunkDone,
}

/// Resolves visibility rows to CF entries and phase gradients. The mapper
/// owns the cache and every per-chunk cache of groupings and gradients.
pub struct VisRowCfMapper {
    cache: ConvolutionFunctionCache,
    params: MapperParams,
    /// The geometry of the image; the field id is that of the last chunk.
    field: FieldContext,
    /// Indexed by antenna.
    antenna_types: Vec<u32>,
    kind: CfKind,

    grouper: AntennaGrouper,
    bl_mapper: BaselineGroupMapper,
    grads: PhaseGradientCalculator,

    state: ChunkState,
    last_field_id: Option<usize>,
}

impl VisRowCfMapper {
    /// `field` gives the image geometry; its field id is ignored.
    /// `antenna_types` gives the type of each antenna, indexed by antenna id.
    pub fn new(
        cache: ConvolutionFunctionCache,
        params: MapperParams,
        field: FieldContext,
        antenna_types: Vec<u32>,
    ) -> VisRowCfMapper {
        VisRowCfMapper {
            cache,
            grouper: AntennaGrouper::new(&params),
            params,
            field,
            antenna_types,
            kind: CfKind::Cf,
            bl_mapper: BaselineGroupMapper::new(),
            grads: PhaseGradientCalculator::new(),
            state: ChunkState::ChunkDone,
            last_field_id: None,
        }
    }

    /// Open the cache in `dir` and make a mapper over it. Only metadata is
    /// read if `params.lazy_fill` is set.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        params: MapperParams,
        field: FieldContext,
        antenna_types: Vec<u32>,
    ) -> Result<VisRowCfMapper, CfCacheError> {
        let cache = ConvolutionFunctionCache::open(dir, params.lazy_fill, None)?;
        Ok(VisRowCfMapper::new(cache, params, field, antenna_types))
    }

    /// Resolve rows against entries of another kind (e.g. weighting
    /// functions).
    pub fn with_kind(mut self, kind: CfKind) -> VisRowCfMapper {
        self.kind = kind;
        self
    }

    pub fn cache(&self) -> &ConvolutionFunctionCache {
        &self.cache
    }

    pub fn params(&self) -> &MapperParams {
        &self.params
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn grouper(&self) -> &AntennaGrouper {
        &self.grouper
    }

    pub fn phase_gradients(&self) -> &PhaseGradientCalculator {
        &self.grads
    }

    /// Load the payload of a resolved CF.
    pub fn materialise(&mut self, cf: CfHandle) -> Result<Arc<Array4<c32>>, CfCacheError> {
        self.cache.materialise(cf)
    }

    /// Give up ownership of the cache.
    pub fn into_cache(self) -> ConvolutionFunctionCache {
        self.cache
    }

    /// Resolve every row of a chunk. A row without a matching CF is reported
    /// as a [`RowMiss`] without affecting the other rows.
    pub fn resolve_chunk(
        &mut self,
        chunk: &VisChunk,
        pointing: &dyn PointingOffsetProvider,
    ) -> Result<ChunkResolution, VisMapError> {
        self.state = ChunkState::ChunkStart;
        let field_changed = self.last_field_id != Some(chunk.field_id);
        self.field.field_id = chunk.field_id;
        let num_rows = chunk.rows.len();

        // Grouping and row mapping happen once per chunk.
        let (bl_map, regrouped) = if self.params.do_pointing {
            let offsets = pointing.offsets(chunk)?;
            let stale = self.grouper.check(
                chunk.field_id,
                num_rows,
                &offsets,
                self.field.pixel_scale_rad(),
            );
            let grouping = match stale {
                Some(reason) => {
                    trace!("Grouping is stale: {reason}");
                    self.state = ChunkState::Regroup;
                    self.grouper
                        .regroup(chunk.field_id, num_rows, &offsets, reason)
                }
                None => {
                    self.state = ChunkState::GroupingValid;
                    self.grouper.grouping_for(&offsets)
                }
            };

            self.state = ChunkState::RowMap;
            let bl_map = self.bl_mapper.map(
                chunk.rows.iter().map(|r| (r.ant1, r.ant2)),
                grouping,
                stale.is_some(),
            );
            if stale.is_some() {
                debug!(
                    "{} antenna groups give {} baseline groups ({} unordered)",
                    bl_map.num_antenna_groups(),
                    bl_map.num_baseline_groups(),
                    bl_map.num_unordered_baseline_groups()
                );
            }
            if let Some(row) = bl_map.first_unmapped_row() {
                let r = chunk.rows[row];
                return Err(VisMapError::UngroupedAntenna {
                    row,
                    ant1: r.ant1,
                    ant2: r.ant2,
                });
            }
            (bl_map, stale)
        } else {
            self.state = ChunkState::RowMap;
            (self.bl_mapper.map_single(num_rows, field_changed), None)
        };
        if field_changed {
            debug!("Field changed to {}", chunk.field_id);
        }

        self.state = ChunkState::PerRowResolve;
        let handles = self.lookup_rows(chunk)?;
        let max_cf_size = handles
            .iter()
            .flatten()
            .filter_map(|&h| self.cache.entry(h))
            .map(|e| e.meta.support_size as usize)
            .max()
            .unwrap_or(0);

        let grads = self.gradients(&bl_map, &handles, max_cf_size, field_changed)?;
        let num_grads_computed = grads.values().filter(|(_, computed)| *computed).count();

        let mut chan_maps = IndexMap::new();
        let mut rows = Vec::with_capacity(num_rows);
        for (i_row, (handle, row)) in handles.iter().zip(chunk.rows.iter()).enumerate() {
            let cf = match handle {
                Some(h) => *h,
                None => {
                    rows.push(Err(RowMiss {
                        row: i_row,
                        key: self.row_key(row),
                    }));
                    continue;
                }
            };
            let baseline_group =
                bl_map
                    .group_of_row(i_row)
                    .ok_or(VisMapError::UngroupedAntenna {
                        row: i_row,
                        ant1: row.ant1,
                        ant2: row.ant2,
                    })?;
            let (phase_grad, _) = grads
                .get(&baseline_group)
                .ok_or(PhaseGradError::UnknownBaselineGroup(baseline_group))?;
            chan_maps
                .entry(cf)
                .or_insert_with(|| self.chan_map(cf, &chunk.freqs_hz));
            rows.push(Ok(ResolvedRow {
                cf,
                baseline_group,
                phase_grad: Arc::clone(phase_grad),
            }));
        }

        let resolution = ChunkResolution {
            rows,
            regrouped,
            chan_maps,
            max_cf_size,
            num_grads_computed,
        };
        debug!(
            "Chunk of field {}: {}/{} rows resolved, {} CFs, {} phase gradients computed",
            chunk.field_id,
            resolution.num_resolved(),
            num_rows,
            resolution.chan_maps.len(),
            num_grads_computed
        );
        self.last_field_id = Some(chunk.field_id);
        self.state = ChunkState::ChunkDone;
        Ok(resolution)
    }

    /// Make a blank entry on disk for every distinct key missed in a chunk,
    /// so that a fill pass can give them content. `template` supplies
    /// everything but the key and PA tolerance. A miss that is covered by a
    /// blank made earlier in the same call doesn't get another.
    pub fn create_blanks_for_misses(
        &mut self,
        resolution: &ChunkResolution,
        template: &CfMetadata,
    ) -> Result<Vec<CfHandle>, CfCacheError> {
        let mut created = vec![];
        for miss in resolution.misses() {
            if self.cache.lookup(&miss.key).is_some() {
                continue;
            }
            let mut meta = template.clone();
            meta.kind = miss.key.kind;
            meta.parallactic_angle_deg = miss.key.pa_deg;
            meta.pa_tolerance_deg = self.params.pa_tolerance_deg;
            meta.ant_type1 = miss.key.ant_type1;
            meta.ant_type2 = miss.key.ant_type2;
            let handle = self.cache.create_blank(meta);
            self.cache.persist(handle, self.params.overwrite)?;
            created.push(handle);
        }
        if !created.is_empty() {
            info!(
                "Created {} blank CF entries for missed rows in '{}'",
                created.len(),
                self.cache.dir().display()
            );
        }
        Ok(created)
    }

    fn row_key(&self, row: &VisRow) -> CfKey {
        let t = |ant: AntennaId| self.antenna_types.get(ant).copied().unwrap_or(0);
        CfKey {
            kind: self.kind,
            pa_deg: row.parallactic_angle_deg,
            ant_type1: t(row.ant1),
            ant_type2: t(row.ant2),
        }
    }

    /// Look up the CF of every row. Consecutive rows usually share a key, so
    /// the last lookup is remembered.
    fn lookup_rows(&self, chunk: &VisChunk) -> Result<Vec<Option<CfHandle>>, VisMapError> {
        let mut last: Option<(CfKey, Option<CfHandle>)> = None;
        let mut handles = Vec::with_capacity(chunk.rows.len());
        for row in &chunk.rows {
            for ant in [row.ant1, row.ant2] {
                if ant >= self.antenna_types.len() {
                    return Err(VisMapError::UnknownAntennaType(ant));
                }
            }
            let key = self.row_key(row);
            let handle = match last {
                Some((last_key, h)) if last_key == key => h,
                _ => {
                    let h = self.cache.lookup(&key);
                    last = Some((key, h));
                    h
                }
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Get the phase gradient of every baseline group used by a resolved row.
    /// The flag says whether the gradient was computed for this chunk.
    fn gradients(
        &mut self,
        bl_map: &BaselineGroupMap,
        handles: &[Option<CfHandle>],
        support: usize,
        field_changed: bool,
    ) -> Result<HashMap<usize, (Arc<Array2<c32>>, bool)>, VisMapError> {
        let used: BTreeSet<usize> = handles
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .filter_map(|(i_row, _)| bl_map.group_of_row(i_row))
            .collect();

        let mut grads = HashMap::with_capacity(used.len());
        for id in used {
            let needs = NeedsRecompute {
                pointing: bl_map.is_dirty(id),
                field: field_changed,
            };
            let before = self.grads.num_computed();
            let pair = bl_map.offset_pair(id);
            let grad = self
                .grads
                .get_or_compute(id, pair, &self.field, support, needs)?;
            let computed = self.grads.num_computed() != before;
            if computed {
                if let Some(pair) = pair {
                    self.bl_mapper.mark_computed(id, *pair);
                }
            } else {
                trace!("Reusing phase gradient of baseline group {id}");
            }
            grads.insert(id, (grad, computed));
        }
        Ok(grads)
    }

    fn chan_map(&self, cf: CfHandle, freqs_hz: &[f64]) -> Vec<usize> {
        match self.cache.entry(cf) {
            Some(e) => freqs_hz
                .iter()
                .map(|&f| e.meta.nearest_freq_index(f).unwrap_or(0))
                .collect(),
            None => vec![0; freqs_hz.len()],
        }
    }
}
