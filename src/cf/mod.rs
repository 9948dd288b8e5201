// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
A disk-backed cache of convolution functions (CFs).

Entries are located by their kind, antenna-type pair and parallactic angle
(PA). Each entry stores its own PA tolerance; a lookup matches any entry of the
right kind and type pair whose PA is within that tolerance, preferring the
closest. Entries may be held "lazily" (metadata only) and have their payloads
read from disk on first use.
 */

mod error;
mod fill;
pub(crate) mod io;
#[cfg(test)]
mod tests;

pub use error::*;
pub use fill::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, trace, warn};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    c32,
    constants::{CF_DATA_EXT, CF_META_EXT, MAX_SELECTABLE_PA_DEG},
    math::nearest_index,
};

/// The families of functions held in a cache directory.
#[derive(
    Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CfKind {
    /// Convolution functions.
    #[strum(serialize = "CFS")]
    #[serde(rename = "CFS")]
    Cf,

    /// Weighting functions.
    #[strum(serialize = "WTCFS")]
    #[serde(rename = "WTCFS")]
    WeightCf,
}

/// What a lookup is done with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfKey {
    pub kind: CfKind,
    pub pa_deg: f64,
    pub ant_type1: u32,
    pub ant_type2: u32,
}

impl std::fmt::Display for CfKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (antenna types {}-{}, PA {:+.4}°)",
            self.kind, self.ant_type1, self.ant_type2, self.pa_deg
        )
    }
}

/// Everything about an entry that isn't its payload. This is what gets
/// written to an entry's metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfMetadata {
    pub kind: CfKind,
    pub parallactic_angle_deg: f64,
    pub pa_tolerance_deg: f64,
    pub ant_type1: u32,
    pub ant_type2: u32,
    /// The Mueller elements held along the first payload axis.
    pub mueller_elements: Vec<u32>,
    pub freqs_hz: Vec<f64>,
    pub oversampling: u32,
    /// The edge length of the (square) CF in samples.
    pub support_size: u32,
    /// The shape of the payload on disk. Blank entries have shape
    /// `[1, 1, 1, 1]`.
    pub shape: [usize; 4],
    pub filled: bool,
    /// Increases every time an entry is created or filled. When entries
    /// conflict, the largest serial wins.
    pub serial: u64,
    /// Free-form information on where this entry came from.
    #[serde(default)]
    pub provenance: IndexMap<String, String>,
}

impl CfMetadata {
    /// Metadata for a new, blank entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: CfKind,
        parallactic_angle_deg: f64,
        pa_tolerance_deg: f64,
        ant_type1: u32,
        ant_type2: u32,
        mueller_elements: Vec<u32>,
        freqs_hz: Vec<f64>,
        oversampling: u32,
        support_size: u32,
    ) -> CfMetadata {
        CfMetadata {
            kind,
            parallactic_angle_deg,
            pa_tolerance_deg,
            ant_type1,
            ant_type2,
            mueller_elements,
            freqs_hz,
            oversampling,
            support_size,
            shape: [1, 1, 1, 1],
            filled: false,
            serial: 0,
            provenance: IndexMap::new(),
        }
    }

    pub fn key(&self) -> CfKey {
        CfKey {
            kind: self.kind,
            pa_deg: self.parallactic_angle_deg,
            ant_type1: self.ant_type1,
            ant_type2: self.ant_type2,
        }
    }

    /// The shape a filled payload of this entry must have.
    pub fn filled_shape(&self) -> [usize; 4] {
        let n = self.support_size as usize;
        [self.mueller_elements.len(), self.freqs_hz.len(), n, n]
    }

    /// The index of the stored frequency nearest to `freq_hz`.
    pub fn nearest_freq_index(&self, freq_hz: f64) -> Option<usize> {
        nearest_index(&self.freqs_hz, freq_hz)
    }

    fn same_exact_key(&self, other: &CfMetadata) -> bool {
        self.kind == other.kind
            && self.ant_type1 == other.ant_type1
            && self.ant_type2 == other.ant_type2
            && self.parallactic_angle_deg == other.parallactic_angle_deg
    }
}

/// An entry of the cache. `payload` is `None` until the entry is materialised.
#[derive(Debug, Clone)]
pub struct CfEntry {
    pub meta: CfMetadata,
    stem: String,
    payload: Option<Arc<Array4<c32>>>,
}

impl CfEntry {
    fn new(meta: CfMetadata, stem: Option<String>, payload: Option<Arc<Array4<c32>>>) -> CfEntry {
        let stem = stem.unwrap_or_else(|| io::entry_stem(&meta));
        CfEntry {
            meta,
            stem,
            payload,
        }
    }

    /// The file stem of this entry in the cache directory.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn is_materialised(&self) -> bool {
        self.payload.is_some()
    }

    /// The payload, if it has been materialised.
    pub fn payload(&self) -> Option<&Arc<Array4<c32>>> {
        self.payload.as_ref()
    }
}

/// A reference to an entry of a [`ConvolutionFunctionCache`]. Handles stay
/// valid for the lifetime of the cache that gave them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfHandle(usize);

/// Restrict the entries loaded when opening a cache to those near a PA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaSelection {
    pub pa_deg: f64,
    pub tolerance_deg: f64,
}

impl PaSelection {
    fn accepts(&self, pa_deg: f64) -> bool {
        // Out-of-range selections select everything.
        if self.pa_deg.abs() > MAX_SELECTABLE_PA_DEG {
            return true;
        }
        (pa_deg - self.pa_deg).abs() <= self.tolerance_deg
    }
}

pub struct ConvolutionFunctionCache {
    dir: PathBuf,
    entries: Vec<CfEntry>,
    /// Handles of entries with the same kind and antenna-type pair.
    index: IndexMap<(CfKind, u32, u32), Vec<CfHandle>>,
    next_serial: u64,
}

impl ConvolutionFunctionCache {
    /// Start an empty cache backed by `dir`, creating the directory if
    /// necessary. No entries are loaded, but serials of new entries continue
    /// from those already on disk.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<ConvolutionFunctionCache, CfCacheError> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(CfCacheError::EmptyCacheDir);
        }
        let next_serial = if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|source| CfCacheError::CreateCacheDir {
                dir: dir.to_path_buf(),
                source,
            })?;
            0
        } else if !dir.is_dir() {
            return Err(CfCacheError::BadCacheDir {
                dir: dir.to_path_buf(),
            });
        } else {
            io::max_serial(dir)?.map_or(0, |s| s + 1)
        };

        Ok(ConvolutionFunctionCache {
            dir: dir.to_path_buf(),
            entries: vec![],
            index: IndexMap::new(),
            next_serial,
        })
    }

    /// Open an existing cache directory. With `lazy`, only metadata is read;
    /// otherwise the payloads of filled entries are read too. Entries that
    /// can't be read are reported and skipped.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        lazy: bool,
        selection: Option<PaSelection>,
    ) -> Result<ConvolutionFunctionCache, CfCacheError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CfCacheError::BadCacheDir {
                dir: dir.to_path_buf(),
            });
        }
        let mut cache = ConvolutionFunctionCache::new(dir)?;

        let mut meta_files = std::fs::read_dir(dir)
            .map_err(|source| CfCacheError::StorageUnavailable {
                key: "(cache directory)".to_string(),
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(CF_META_EXT))
            .collect::<Vec<_>>();
        // Directory order is arbitrary.
        meta_files.sort();

        let mut loaded: Vec<CfEntry> = vec![];
        for meta_file in meta_files {
            let stem = match meta_file.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let meta = match io::read_metadata(&meta_file, &stem) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping CF entry: {e}");
                    continue;
                }
            };
            if let Some(sel) = selection {
                if !sel.accepts(meta.parallactic_angle_deg) {
                    trace!("{} is outside the PA selection", meta.key());
                    continue;
                }
            }

            let entry = CfEntry::new(meta, Some(stem), None);
            match loaded
                .iter_mut()
                .find(|e| e.meta.same_exact_key(&entry.meta))
            {
                Some(existing) => {
                    let (live, superseded) = if entry.meta.serial > existing.meta.serial {
                        (entry, existing.clone())
                    } else {
                        (existing.clone(), entry)
                    };
                    warn!(
                        "'{}' (serial {}) is superseded by '{}' (serial {}); ignoring it",
                        superseded.stem, superseded.meta.serial, live.stem, live.meta.serial
                    );
                    *existing = live;
                }
                None => loaded.push(entry),
            }
        }

        for mut entry in loaded {
            cache.next_serial = cache.next_serial.max(entry.meta.serial + 1);
            if !lazy && entry.meta.filled {
                let path = cache.data_path(&entry.stem);
                match io::read_payload(&path, &entry.meta.key().to_string()) {
                    Ok(p) if p.dim() == shape_tuple(entry.meta.shape) => {
                        entry.payload = Some(Arc::new(p))
                    }
                    Ok(p) => warn!(
                        "Payload of {} has shape {:?} but its metadata says {:?}; leaving it unloaded",
                        entry.meta.key(),
                        p.shape(),
                        entry.meta.shape
                    ),
                    Err(e) => warn!("Couldn't load payload: {e}"),
                }
            }
            cache.push(entry);
        }

        debug!(
            "Opened CF cache '{}' with {} entries ({})",
            dir.display(),
            cache.len(),
            if lazy { "lazy" } else { "eager" }
        );
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, handle: CfHandle) -> Option<&CfEntry> {
        self.entries.get(handle.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = (CfHandle, &CfEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (CfHandle(i), e))
    }

    /// Find the entry to use for `key`. Only entries of the same kind and
    /// antenna-type pair are considered, and only if `key`'s PA is within an
    /// entry's tolerance of its PA. The closest PA wins; exact ties go to the
    /// earlier-created entry.
    pub fn lookup(&self, key: &CfKey) -> Option<CfHandle> {
        let candidates = self
            .index
            .get(&(key.kind, key.ant_type1, key.ant_type2))?;
        let found = candidates
            .iter()
            .filter_map(|&h| {
                let meta = &self.entries[h.0].meta;
                let diff = (key.pa_deg - meta.parallactic_angle_deg).abs();
                (diff <= meta.pa_tolerance_deg).then_some((h, diff, meta.serial))
            })
            .min_by(|(_, d1, s1), (_, d2, s2)| d1.total_cmp(d2).then(s1.cmp(s2)))
            .map(|(h, _, _)| h);
        match found {
            Some(h) => trace!("{key} -> '{}'", self.entries[h.0].stem),
            None => debug!("No CF entry matches {key}"),
        }
        found
    }

    /// Load the payload of an entry if it isn't already in memory. Blank
    /// entries get their single-sample placeholder without touching the disk.
    /// Subsequent calls return the in-memory payload.
    pub fn materialise(&mut self, handle: CfHandle) -> Result<Arc<Array4<c32>>, CfCacheError> {
        let data_path = match self.entries.get(handle.0) {
            Some(e) => self.data_path(&e.stem),
            None => return Err(CfCacheError::UnknownHandle(handle.0)),
        };
        let entry = &mut self.entries[handle.0];
        if let Some(p) = &entry.payload {
            return Ok(Arc::clone(p));
        }

        let payload = if entry.meta.filled {
            let key = entry.meta.key().to_string();
            trace!("Reading payload of {key} from '{}'", data_path.display());
            let payload = io::read_payload(&data_path, &key)?;
            if payload.dim() != shape_tuple(entry.meta.shape) {
                return Err(CfCacheError::CorruptEntry {
                    key,
                    path: data_path,
                    reason: format!(
                        "payload has shape {:?}, but the metadata says {:?}",
                        payload.shape(),
                        entry.meta.shape
                    ),
                });
            }
            Arc::new(payload)
        } else {
            Arc::new(placeholder())
        };
        entry.payload = Some(Arc::clone(&payload));
        Ok(payload)
    }

    /// Write an entry's payload and metadata to the cache directory. Existing
    /// files are only replaced if `overwrite` is set.
    pub fn persist(&mut self, handle: CfHandle, overwrite: bool) -> Result<(), CfCacheError> {
        let entry = self
            .entries
            .get(handle.0)
            .ok_or(CfCacheError::UnknownHandle(handle.0))?;
        let meta_path = self.meta_path(&entry.stem);
        let data_path = self.data_path(&entry.stem);
        if !overwrite {
            if let Some(p) = [&meta_path, &data_path].into_iter().find(|p| p.exists()) {
                return Err(CfCacheError::WouldOverwrite { path: p.clone() });
            }
        }

        let key = entry.meta.key().to_string();
        match (&entry.payload, entry.meta.filled) {
            (Some(p), _) => io::write_payload(&data_path, &key, p.view())?,
            (None, false) => io::write_payload(&data_path, &key, placeholder().view())?,
            // A filled entry that was never materialised is already on disk.
            (None, true) if data_path.exists() => (),
            (None, true) => return Err(CfCacheError::NoPayload { key }),
        }
        // Metadata goes last; an entry without metadata is invisible.
        io::write_metadata(&meta_path, &entry.meta)?;
        debug!("Persisted {key} to '{}'", meta_path.display());
        Ok(())
    }

    /// Insert a blank entry for a later fill pass to find. An in-memory entry
    /// with the same exact key is replaced.
    pub fn create_blank(&mut self, mut meta: CfMetadata) -> CfHandle {
        meta.filled = false;
        meta.shape = [1, 1, 1, 1];
        self.insert(meta, Some(Arc::new(placeholder())))
    }

    /// Insert a filled entry. An in-memory entry with the same exact key is
    /// replaced.
    pub fn insert_filled(
        &mut self,
        mut meta: CfMetadata,
        payload: Array4<c32>,
    ) -> Result<CfHandle, CfCacheError> {
        check_payload_shape(&meta, &payload)?;
        meta.filled = true;
        meta.shape = meta.filled_shape();
        Ok(self.insert(meta, Some(Arc::new(payload))))
    }

    /// Give an existing entry its numeric content. The entry gets a new serial
    /// so that it supersedes any earlier fill.
    pub fn fill(&mut self, handle: CfHandle, payload: Array4<c32>) -> Result<(), CfCacheError> {
        let serial = self.next_serial;
        let entry = self
            .entries
            .get_mut(handle.0)
            .ok_or(CfCacheError::UnknownHandle(handle.0))?;
        check_payload_shape(&entry.meta, &payload)?;
        entry.meta.filled = true;
        entry.meta.shape = entry.meta.filled_shape();
        entry.meta.serial = serial;
        entry.payload = Some(Arc::new(payload));
        self.next_serial += 1;
        Ok(())
    }

    /// The number of bytes held by materialised payloads.
    pub fn mem_usage_bytes(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.payload.as_ref())
            .map(|p| p.len() * std::mem::size_of::<c32>())
            .sum()
    }

    /// Log what's in the cache.
    pub fn summarise(&self) {
        info!(
            "CF cache '{}': {} entries, {} KiB in memory",
            self.dir.display(),
            self.len(),
            self.mem_usage_bytes() / 1024
        );
        for e in &self.entries {
            info!(
                "  {:<40} {:>5} {:+9.4}° types {}-{} support {:>4} freqs {:>3} {}{}",
                e.stem,
                e.meta.kind,
                e.meta.parallactic_angle_deg,
                e.meta.ant_type1,
                e.meta.ant_type2,
                e.meta.support_size,
                e.meta.freqs_hz.len(),
                if e.meta.filled { "filled" } else { "blank" },
                if e.is_materialised() { ", in memory" } else { "" }
            );
        }
    }

    pub(crate) fn meta_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{CF_META_EXT}"))
    }

    pub(crate) fn data_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{CF_DATA_EXT}"))
    }

    fn insert(&mut self, mut meta: CfMetadata, payload: Option<Arc<Array4<c32>>>) -> CfHandle {
        meta.serial = self.next_serial;
        self.next_serial += 1;
        let existing = self
            .index
            .get(&(meta.kind, meta.ant_type1, meta.ant_type2))
            .and_then(|hs| {
                hs.iter()
                    .copied()
                    .find(|h| self.entries[h.0].meta.same_exact_key(&meta))
            });
        let entry = CfEntry::new(meta, None, payload);
        match existing {
            Some(h) => {
                debug!("Replacing in-memory entry {}", entry.meta.key());
                self.entries[h.0] = entry;
                h
            }
            None => self.push(entry),
        }
    }

    fn push(&mut self, entry: CfEntry) -> CfHandle {
        let handle = CfHandle(self.entries.len());
        self.index
            .entry((entry.meta.kind, entry.meta.ant_type1, entry.meta.ant_type2))
            .or_default()
            .push(handle);
        self.entries.push(entry);
        handle
    }
}

impl std::fmt::Debug for ConvolutionFunctionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionFunctionCache")
            .field("dir", &self.dir)
            .field(
                "entries",
                &self.entries.iter().map(|e| e.stem.as_str()).collect_vec(),
            )
            .finish()
    }
}

/// The payload of a blank entry.
fn placeholder() -> Array4<c32> {
    Array4::zeros((1, 1, 1, 1))
}

fn shape_tuple(s: [usize; 4]) -> (usize, usize, usize, usize) {
    (s[0], s[1], s[2], s[3])
}

fn check_payload_shape(meta: &CfMetadata, payload: &Array4<c32>) -> Result<(), CfCacheError> {
    let expected = meta.filled_shape();
    let (a, b, c, d) = payload.dim();
    let got = [a, b, c, d];
    if got != expected {
        return Err(CfCacheError::PayloadShape {
            key: meta.key().to_string(),
            expected,
            got,
        });
    }
    Ok(())
}
