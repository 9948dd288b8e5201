// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mapping visibility rows to baseline groups.
//!
//! A baseline group is an ordered pair of antenna groups `(g1, g2)` with the
//! id `g1 * num_groups + g2`. Order matters, because swapping the antennas of
//! a baseline flips the sign of its phase.


use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::trace;

use crate::{
    antenna_groups::{AntennaGrouping, AntennaId},
    math,
};

/// The representative offsets of the two antenna groups of a baseline group
/// \[pixels\].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetPair {
    pub first: [f64; 2],
    pub second: [f64; 2],
}

impl OffsetPair {
    pub const ZERO: OffsetPair = OffsetPair {
        first: [0.0, 0.0],
        second: [0.0, 0.0],
    };

    /// The offset a phase gradient corrects for.
    pub fn mean(&self) -> [f64; 2] {
        [
            (self.first[0] + self.second[0]) / 2.0,
            (self.first[1] + self.second[1]) / 2.0,
        ]
    }
}

/// The baseline groups of the rows of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineGroupMap {
    /// `None` if a row's antennas aren't in the grouping.
    row_to_group: Vec<Option<usize>>,
    num_antenna_groups: usize,
    /// The ids whose phase gradients are stale.
    dirty: BTreeSet<usize>,
    /// The offset pairs of all ids used by the rows.
    pairs: BTreeMap<usize, OffsetPair>,
}

impl BaselineGroupMap {
    /// All rows in the single baseline group 0, which has no pointing offset.
    pub fn single(num_rows: usize) -> BaselineGroupMap {
        BaselineGroupMap {
            row_to_group: vec![Some(0); num_rows],
            num_antenna_groups: 1,
            dirty: BTreeSet::new(),
            pairs: BTreeMap::from([(0, OffsetPair::ZERO)]),
        }
    }

    pub fn row_to_group(&self) -> &[Option<usize>] {
        &self.row_to_group
    }

    pub fn group_of_row(&self, row: usize) -> Option<usize> {
        self.row_to_group.get(row).copied().flatten()
    }

    pub fn num_antenna_groups(&self) -> usize {
        self.num_antenna_groups
    }

    /// The number of possible baseline-group ids.
    pub fn num_baseline_groups(&self) -> usize {
        self.num_antenna_groups * self.num_antenna_groups
    }

    /// The number of baseline groups if antenna order didn't matter.
    pub fn num_unordered_baseline_groups(&self) -> usize {
        math::num_unordered_baseline_groups(self.num_antenna_groups)
    }

    /// The distinct ids used by the rows, ascending.
    pub fn used_groups(&self) -> impl Iterator<Item = usize> + '_ {
        self.pairs.keys().copied()
    }

    pub fn dirty(&self) -> &BTreeSet<usize> {
        &self.dirty
    }

    pub fn is_dirty(&self, id: usize) -> bool {
        self.dirty.contains(&id)
    }

    pub fn offset_pair(&self, id: usize) -> Option<&OffsetPair> {
        self.pairs.get(&id)
    }

    /// The first row whose antennas aren't in the grouping.
    pub fn first_unmapped_row(&self) -> Option<usize> {
        self.row_to_group.iter().position(|g| g.is_none())
    }
}

/// Assigns rows to baseline groups and remembers which offsets each
/// baseline group's phase gradient was last computed with.
#[derive(Debug, Clone, Default)]
pub struct BaselineGroupMapper {
    computed_with: HashMap<usize, OffsetPair>,
}

impl BaselineGroupMapper {
    pub fn new() -> BaselineGroupMapper {
        BaselineGroupMapper::default()
    }

    /// Map every row (given as its antenna pair) to a baseline group. If
    /// `grouping_changed`, every baseline group is dirty; otherwise only those
    /// whose offsets differ from what they were last computed with.
    pub fn map<I>(
        &mut self,
        rows: I,
        grouping: &AntennaGrouping,
        grouping_changed: bool,
    ) -> BaselineGroupMap
    where
        I: IntoIterator<Item = (AntennaId, AntennaId)>,
    {
        if grouping_changed {
            self.computed_with.clear();
        }

        let num_groups = grouping.num_groups();
        let mut pairs = BTreeMap::new();
        let row_to_group = rows
            .into_iter()
            .map(|(ant1, ant2)| {
                let g1 = grouping.group_of(ant1)?;
                let g2 = grouping.group_of(ant2)?;
                let id = g1 * num_groups + g2;
                pairs.entry(id).or_insert_with(|| OffsetPair {
                    first: grouping.groups()[g1].representative_offset(),
                    second: grouping.groups()[g2].representative_offset(),
                });
                Some(id)
            })
            .collect();

        let dirty = self.find_dirty(&pairs, grouping_changed);
        trace!(
            "{} baseline groups in use, {} dirty",
            pairs.len(),
            dirty.len()
        );
        BaselineGroupMap {
            row_to_group,
            num_antenna_groups: num_groups,
            dirty,
            pairs,
        }
    }

    /// Map every row to baseline group 0 with no pointing offset.
    pub fn map_single(&mut self, num_rows: usize, force_dirty: bool) -> BaselineGroupMap {
        let mut map = BaselineGroupMap::single(num_rows);
        map.dirty = self.find_dirty(&map.pairs, force_dirty);
        map
    }

    /// Record that baseline group `id` now has a phase gradient for `pair`.
    pub fn mark_computed(&mut self, id: usize, pair: OffsetPair) {
        self.computed_with.insert(id, pair);
    }

    /// Forget every computed gradient.
    pub fn reset(&mut self) {
        self.computed_with.clear();
    }

    fn find_dirty(&self, pairs: &BTreeMap<usize, OffsetPair>, all: bool) -> BTreeSet<usize> {
        pairs
            .iter()
            .filter(|&(&id, pair)| all || self.computed_with.get(&id) != Some(pair))
            .map(|(&id, _)| id)
            .collect()
    }
}
