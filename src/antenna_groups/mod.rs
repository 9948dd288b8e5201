// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Grouping antennas by pointing offset.

Antennas whose pointing offsets fall into the same square bin of the offset
plane share a group, and every group is represented by the mean offset of its
members. Phase gradients are then only needed per pair of groups, rather than
per pair of antennas.
 */


use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::{debug, info, trace};
use vec1::Vec1;

use crate::{
    constants::ARCSEC_TO_RAD,
    math::{hypot, mean_point},
    params::{sanitise_bin_edge, DriftCriterion, MapperParams},
};

/// Antennas are identified by their index in the array.
pub type AntennaId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct AntennaGroup {
    /// Sorted ascending.
    members: Vec1<AntennaId>,
    /// The mean of the members' offsets \[pixels\].
    representative: [f64; 2],
}

impl AntennaGroup {
    pub fn members(&self) -> &[AntennaId] {
        &self.members
    }

    pub fn representative_offset(&self) -> [f64; 2] {
        self.representative
    }
}

/// A partition of antennas into groups, along with the offsets it was made
/// from.
#[derive(Debug, Clone, PartialEq)]
pub struct AntennaGrouping {
    groups: Vec<AntennaGroup>,
    membership: BTreeMap<AntennaId, usize>,
    offsets: BTreeMap<AntennaId, [f64; 2]>,
    bin_edge_pix: f64,
}

impl AntennaGrouping {
    /// Group antennas by their pointing offsets \[pixels\].
    ///
    /// The offsets are translated so that the smallest coordinates are at the
    /// origin, and then each antenna is put into the bin `(floor(dx /
    /// bin_edge), floor(dy / bin_edge))`. Groups are ordered by bin, so the
    /// result doesn't depend on the order of `offsets`. A non-positive
    /// `bin_edge_pix` is replaced with a small positive value.
    pub fn group(offsets: &IndexMap<AntennaId, [f64; 2]>, bin_edge_pix: f64) -> AntennaGrouping {
        let bin_edge_pix = sanitise_bin_edge(bin_edge_pix);
        let min = offsets.values().fold([f64::INFINITY; 2], |acc, o| {
            [acc[0].min(o[0]), acc[1].min(o[1])]
        });

        let mut bins: BTreeMap<(i64, i64), Vec<AntennaId>> = BTreeMap::new();
        for (&ant, o) in offsets {
            let bin = (
                ((o[0] - min[0]) / bin_edge_pix).floor() as i64,
                ((o[1] - min[1]) / bin_edge_pix).floor() as i64,
            );
            bins.entry(bin).or_default().push(ant);
        }

        let mut groups = Vec::with_capacity(bins.len());
        let mut membership = BTreeMap::new();
        for (bin, mut members) in bins {
            members.sort_unstable();
            let representative = mean_point(members.iter().map(|a| &offsets[a]))
                .unwrap_or([0.0, 0.0]);
            trace!(
                "Bin {bin:?}: antennas {members:?}, mean offset ({:.3}, {:.3}) px",
                representative[0],
                representative[1]
            );
            for &a in &members {
                membership.insert(a, groups.len());
            }
            // Bins only exist if something was put in them.
            if let Ok(members) = Vec1::try_from_vec(members) {
                groups.push(AntennaGroup {
                    members,
                    representative,
                });
            }
        }

        AntennaGrouping {
            groups,
            membership,
            offsets: offsets.iter().map(|(&a, &o)| (a, o)).collect(),
            bin_edge_pix,
        }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[AntennaGroup] {
        &self.groups
    }

    pub fn bin_edge_pix(&self) -> f64 {
        self.bin_edge_pix
    }

    /// The index of the group containing `ant`.
    pub fn group_of(&self, ant: AntennaId) -> Option<usize> {
        self.membership.get(&ant).copied()
    }

    pub fn representative_offset(&self, group: usize) -> Option<[f64; 2]> {
        self.groups.get(group).map(|g| g.representative)
    }

    /// The offset of an antenna when this grouping was made.
    pub fn cached_offset(&self, ant: AntennaId) -> Option<[f64; 2]> {
        self.offsets.get(&ant).copied()
    }

    /// Do `offsets` cover exactly the antennas of this grouping?
    fn same_antennas(&self, offsets: &IndexMap<AntennaId, [f64; 2]>) -> bool {
        offsets.len() == self.offsets.len() && offsets.keys().all(|a| self.offsets.contains_key(a))
    }

    /// Per-antenna distances between `offsets` and the cached offsets
    /// \[pixels\]. Antennas unknown to this grouping are ignored.
    fn residuals<'a>(
        &'a self,
        offsets: &'a IndexMap<AntennaId, [f64; 2]>,
    ) -> impl Iterator<Item = f64> + 'a {
        offsets.iter().filter_map(|(a, o)| {
            self.offsets
                .get(a)
                .map(|c| hypot([o[0] - c[0], o[1] - c[1]]))
        })
    }
}

/// Why a grouping was (re)computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegroupReason {
    NoGrouping,
    FieldChanged { from: usize, to: usize },
    RowCountChanged { from: usize, to: usize },
    AntennasChanged,
    Drifted { drift_rad: f64, threshold_rad: f64 },
}

impl std::fmt::Display for RegroupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegroupReason::NoGrouping => write!(f, "no previous grouping"),
            RegroupReason::FieldChanged { from, to } => {
                write!(f, "field changed from {from} to {to}")
            }
            RegroupReason::RowCountChanged { from, to } => {
                write!(f, "chunk row count changed from {from} to {to}")
            }
            RegroupReason::AntennasChanged => write!(f, "the set of antennas changed"),
            RegroupReason::Drifted {
                drift_rad,
                threshold_rad,
            } => write!(
                f,
                "pointing drifted by {:.3}\" (threshold {:.3}\")",
                drift_rad / ARCSEC_TO_RAD,
                threshold_rad / ARCSEC_TO_RAD
            ),
        }
    }
}

/// Keeps an [`AntennaGrouping`] across visibility chunks, and decides when it
/// has gone stale.
#[derive(Debug, Clone)]
pub struct AntennaGrouper {
    /// With the bin edge already sanitised.
    params: MapperParams,
    grouping: Option<AntennaGrouping>,
    field_id: usize,
    num_rows: usize,
}

impl AntennaGrouper {
    pub fn new(params: &MapperParams) -> AntennaGrouper {
        AntennaGrouper {
            params: MapperParams {
                bin_edge_pix: params.effective_bin_edge_pix(),
                ..params.clone()
            },
            grouping: None,
            field_id: 0,
            num_rows: 0,
        }
    }

    pub fn grouping(&self) -> Option<&AntennaGrouping> {
        self.grouping.as_ref()
    }

    /// Forget the current grouping.
    pub fn reset(&mut self) {
        self.grouping = None;
    }

    /// The drift that forces a regrouping \[radians\].
    pub fn drift_threshold_rad(&self, pixel_scale_rad: f64) -> f64 {
        self.params.effective_drift_threshold_rad(pixel_scale_rad)
    }

    /// Should the grouping be recomputed for a chunk with these properties?
    /// `pixel_scale_rad` converts pixel offsets to angles.
    pub fn check(
        &self,
        field_id: usize,
        num_rows: usize,
        offsets: &IndexMap<AntennaId, [f64; 2]>,
        pixel_scale_rad: f64,
    ) -> Option<RegroupReason> {
        let grouping = match &self.grouping {
            None => return Some(RegroupReason::NoGrouping),
            Some(g) => g,
        };
        if field_id != self.field_id {
            return Some(RegroupReason::FieldChanged {
                from: self.field_id,
                to: field_id,
            });
        }
        if num_rows != self.num_rows {
            return Some(RegroupReason::RowCountChanged {
                from: self.num_rows,
                to: num_rows,
            });
        }
        if !grouping.same_antennas(offsets) {
            return Some(RegroupReason::AntennasChanged);
        }

        let drift_pix = match self.params.drift_criterion {
            DriftCriterion::Mean => {
                let (sum, n) = grouping
                    .residuals(offsets)
                    .fold((0.0, 0), |(s, n), r| (s + r, n + 1));
                if n == 0 {
                    0.0
                } else {
                    sum / n as f64
                }
            }
            DriftCriterion::PerAntenna => grouping.residuals(offsets).fold(0.0, f64::max),
        };
        let drift_rad = drift_pix * pixel_scale_rad.abs();
        let threshold_rad = self.drift_threshold_rad(pixel_scale_rad.abs());
        trace!(
            "Pointing drift {:.3}\" (threshold {:.3}\")",
            drift_rad / ARCSEC_TO_RAD,
            threshold_rad / ARCSEC_TO_RAD
        );
        if drift_rad >= threshold_rad {
            Some(RegroupReason::Drifted {
                drift_rad,
                threshold_rad,
            })
        } else {
            None
        }
    }

    /// Bring the grouping up to date with a chunk. If the existing grouping
    /// can be reused, `None` is returned; otherwise the antennas are regrouped
    /// and the reason is returned.
    pub fn update(
        &mut self,
        field_id: usize,
        num_rows: usize,
        offsets: &IndexMap<AntennaId, [f64; 2]>,
        pixel_scale_rad: f64,
    ) -> Option<RegroupReason> {
        let reason = self.check(field_id, num_rows, offsets, pixel_scale_rad)?;
        self.regroup(field_id, num_rows, offsets, reason);
        Some(reason)
    }

    /// Unconditionally group antennas for a chunk.
    pub fn regroup(
        &mut self,
        field_id: usize,
        num_rows: usize,
        offsets: &IndexMap<AntennaId, [f64; 2]>,
        reason: RegroupReason,
    ) -> &AntennaGrouping {
        match reason {
            RegroupReason::FieldChanged { .. } | RegroupReason::Drifted { .. } => {
                info!("Regrouping antennas: {reason}")
            }
            _ => debug!("Regrouping antennas: {reason}"),
        }

        let grouping = AntennaGrouping::group(offsets, self.params.bin_edge_pix);
        debug!(
            "{} antennas in {} groups (bin edge {} px)",
            offsets.len(),
            grouping.num_groups(),
            grouping.bin_edge_pix()
        );
        self.field_id = field_id;
        self.num_rows = num_rows;
        self.grouping.insert(grouping)
    }

    /// The current grouping, made from `offsets` if there isn't one.
    pub(crate) fn grouping_for(
        &mut self,
        offsets: &IndexMap<AntennaId, [f64; 2]>,
    ) -> &AntennaGrouping {
        let bin_edge_pix = self.params.bin_edge_pix;
        self.grouping
            .get_or_insert_with(|| AntennaGrouping::group(offsets, bin_edge_pix))
    }
}
