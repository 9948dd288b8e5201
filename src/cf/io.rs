// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing CF entries on disk.
//!
//! Every entry is a file pair sharing a stem: `<stem>.toml` holds the
//! metadata and `<stem>.cf` holds the payload. The payload file is a small
//! little-endian binary:
//!
//! | bytes  | content                               |
//! |--------|---------------------------------------|
//! | 8      | `CFCACHE\0`                           |
//! | 4      | format version (u32)                  |
//! | 4 × 8  | dimensions (pol, freq, y, x) as u64s  |
//! | rest   | interleaved f32 real/imag samples     |

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use ndarray::prelude::*;

use super::{CfCacheError, CfMetadata};
use crate::{
    c32,
    constants::{CF_DATA_MAGIC, CF_DATA_VERSION, CF_META_EXT},
};

/// Length of the payload header \[bytes\].
const HEADER_LEN: u64 = 8 + 4 + 4 * 8;

/// Generate the deterministic file stem of an entry. A separate process can
/// recompute this from the same key to find a blank entry.
pub(crate) fn entry_stem(meta: &CfMetadata) -> String {
    format!(
        "{}_{}_{}_M{}_PA{:+09.4}",
        meta.kind,
        meta.ant_type1,
        meta.ant_type2,
        meta.mueller_elements.iter().join("-"),
        meta.parallactic_angle_deg
    )
}

pub(crate) fn read_metadata(path: &Path, key: &str) -> Result<CfMetadata, CfCacheError> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| CfCacheError::StorageUnavailable {
            key: key.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|e| CfCacheError::CorruptEntry {
        key: key.to_string(),
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// The largest serial of any readable entry in `dir`.
pub(crate) fn max_serial(dir: &Path) -> Result<Option<u64>, CfCacheError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CfCacheError::StorageUnavailable {
        key: "(cache directory)".to_string(),
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(CF_META_EXT))
        .filter_map(|p| read_metadata(&p, "(serial scan)").ok())
        .map(|m| m.serial)
        .max())
}

pub(crate) fn write_metadata(path: &Path, meta: &CfMetadata) -> Result<(), CfCacheError> {
    let key = meta.key().to_string();
    let contents = toml::to_string(meta).map_err(|source| CfCacheError::MetadataEncode {
        key: key.clone(),
        source,
    })?;
    std::fs::write(path, contents).map_err(|source| CfCacheError::StorageUnavailable {
        key,
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_payload(path: &Path, key: &str) -> Result<Array4<c32>, CfCacheError> {
    let storage = |source| CfCacheError::StorageUnavailable {
        key: key.to_string(),
        path: path.to_path_buf(),
        source,
    };
    let corrupt = |reason: String| CfCacheError::CorruptEntry {
        key: key.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(storage)?;
    let file_len = file.metadata().map_err(storage)?.len();
    if file_len < HEADER_LEN {
        return Err(corrupt(format!(
            "file is only {file_len} bytes long; too short for a header"
        )));
    }
    let mut bin_file = BufReader::new(file);

    let mut magic = [0; 8];
    bin_file.read_exact(&mut magic).map_err(storage)?;
    if &magic != CF_DATA_MAGIC {
        return Err(corrupt(format!(
            "bad magic bytes {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = bin_file.read_u32::<LittleEndian>().map_err(storage)?;
    if version != CF_DATA_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {version} (expected {CF_DATA_VERSION})"
        )));
    }
    let mut raw_dims = [0u64; 4];
    for d in raw_dims.iter_mut() {
        *d = bin_file.read_u64::<LittleEndian>().map_err(storage)?;
    }
    let expected_len = raw_dims
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt(format!("dimensions {raw_dims:?} are too large")))?;
    if file_len != expected_len {
        let dims = raw_dims;
        return Err(corrupt(format!(
            "dimensions {dims:?} need a {expected_len}-byte file, but it is {file_len} bytes"
        )));
    }
    let mut dims = [0usize; 4];
    for (d, &raw) in dims.iter_mut().zip(raw_dims.iter()) {
        *d = usize::try_from(raw)
            .map_err(|_| corrupt(format!("dimension {raw} doesn't fit in memory")))?;
    }

    let mut payload = Array4::zeros(dims);
    for v in payload.iter_mut() {
        let re = bin_file.read_f32::<LittleEndian>().map_err(storage)?;
        let im = bin_file.read_f32::<LittleEndian>().map_err(storage)?;
        *v = c32::new(re, im);
    }
    Ok(payload)
}

pub(crate) fn write_payload(
    path: &Path,
    key: &str,
    payload: ArrayView4<c32>,
) -> Result<(), CfCacheError> {
    let storage = |source| CfCacheError::StorageUnavailable {
        key: key.to_string(),
        path: path.to_path_buf(),
        source,
    };

    let mut bin_file = BufWriter::new(File::create(path).map_err(storage)?);
    bin_file.write_all(CF_DATA_MAGIC).map_err(storage)?;
    bin_file
        .write_u32::<LittleEndian>(CF_DATA_VERSION)
        .map_err(storage)?;
    for &d in payload.shape() {
        bin_file.write_u64::<LittleEndian>(d as u64).map_err(storage)?;
    }
    // Iterating over the array is in logical (row-major) order regardless of
    // its memory layout.
    for v in payload.iter() {
        bin_file.write_f32::<LittleEndian>(v.re).map_err(storage)?;
        bin_file.write_f32::<LittleEndian>(v.im).map_err(storage)?;
    }
    bin_file.flush().map_err(storage)?;
    Ok(())
}
