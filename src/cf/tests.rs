// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use super::*;
use crate::model::{GaussianAperture, UnitKernel};

fn meta(kind: CfKind, pa_deg: f64, tol_deg: f64, t1: u32, t2: u32) -> CfMetadata {
    CfMetadata::new(
        kind,
        pa_deg,
        tol_deg,
        t1,
        t2,
        vec![0, 5, 10, 15],
        vec![150e6, 160e6],
        4,
        8,
    )
}

fn key(kind: CfKind, pa_deg: f64, t1: u32, t2: u32) -> CfKey {
    CfKey {
        kind,
        pa_deg,
        ant_type1: t1,
        ant_type2: t2,
    }
}

fn filled_payload(meta: &CfMetadata) -> Array4<c32> {
    Array4::from_shape_fn(meta.filled_shape(), |(m, f, y, x)| {
        c32::new((m + f) as f32, (y * 10 + x) as f32)
    })
}

#[test]
fn test_entry_stem() {
    let m = meta(CfKind::Cf, 10.0, 5.0, 0, 1);
    assert_eq!(io::entry_stem(&m), "CFS_0_1_M0-5-10-15_PA+010.0000");

    let mut m = meta(CfKind::WeightCf, -5.25, 5.0, 2, 2);
    m.mueller_elements = vec![0];
    assert_eq!(io::entry_stem(&m), "WTCFS_2_2_M0_PA-005.2500");
}

#[test]
fn test_kind_strings() {
    assert_eq!(CfKind::Cf.to_string(), "CFS");
    assert_eq!(CfKind::from_str("WTCFS").unwrap(), CfKind::WeightCf);
    assert!(CfKind::from_str("cfs").is_err());
}

#[test]
fn test_lookup_respects_tolerance_after_a_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let m = meta(CfKind::Cf, 10.0, 5.0, 0, 0);
    let h = cache.insert_filled(m.clone(), filled_payload(&m)).unwrap();
    cache.persist(h, false).unwrap();

    let cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.lookup(&key(CfKind::Cf, 13.0, 0, 0)).is_some());
    assert!(cache.lookup(&key(CfKind::Cf, 15.0, 0, 0)).is_some());
    assert!(cache.lookup(&key(CfKind::Cf, 5.0, 0, 0)).is_some());
    assert!(cache.lookup(&key(CfKind::Cf, 16.0, 0, 0)).is_none());
    assert!(cache.lookup(&key(CfKind::Cf, 4.0, 0, 0)).is_none());
    // Other type pairs and kinds never match.
    assert!(cache.lookup(&key(CfKind::Cf, 10.0, 0, 1)).is_none());
    assert!(cache.lookup(&key(CfKind::WeightCf, 10.0, 0, 0)).is_none());
}

#[test]
fn test_lookup_picks_closest_then_earliest() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h10 = cache.create_blank(meta(CfKind::Cf, 10.0, 5.0, 0, 0));
    let h14 = cache.create_blank(meta(CfKind::Cf, 14.0, 5.0, 0, 0));
    let h6 = cache.create_blank(meta(CfKind::Cf, 6.0, 5.0, 0, 0));

    assert_eq!(cache.lookup(&key(CfKind::Cf, 13.0, 0, 0)), Some(h14));
    assert_eq!(cache.lookup(&key(CfKind::Cf, 9.0, 0, 0)), Some(h10));
    assert_eq!(cache.lookup(&key(CfKind::Cf, 7.0, 0, 0)), Some(h6));
    // Equidistant from 10 and 14; 10 was created first.
    assert_eq!(cache.lookup(&key(CfKind::Cf, 12.0, 0, 0)), Some(h10));
    // Equidistant from 6 and 10; 10 was created first.
    assert_eq!(cache.lookup(&key(CfKind::Cf, 8.0, 0, 0)), Some(h10));
}

#[test]
fn test_exact_key_insert_replaces() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let m = meta(CfKind::Cf, 10.0, 5.0, 0, 0);
    let h1 = cache.create_blank(m.clone());
    let h2 = cache.insert_filled(m.clone(), filled_payload(&m)).unwrap();
    assert_eq!(h1, h2);
    assert_eq!(cache.len(), 1);
    let e = cache.entry(h1).unwrap();
    assert!(e.meta.filled);
    assert_eq!(e.meta.serial, 1);

    // Same PA, different kind: a separate entry.
    cache.create_blank(meta(CfKind::WeightCf, 10.0, 5.0, 0, 0));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_materialise_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let m = meta(CfKind::Cf, 0.0, 1.0, 0, 1);
    let expected = filled_payload(&m);
    {
        let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
        let h = cache.insert_filled(m.clone(), expected.clone()).unwrap();
        cache.persist(h, false).unwrap();
    }

    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&m.key()).unwrap();
    assert!(!cache.entry(h).unwrap().is_materialised());
    assert_eq!(cache.mem_usage_bytes(), 0);

    let first = cache.materialise(h).unwrap();
    assert_eq!(*first, expected);
    assert_eq!(
        cache.mem_usage_bytes(),
        expected.len() * std::mem::size_of::<c32>()
    );

    // The second call must not touch the disk.
    let stem = cache.entry(h).unwrap().stem().to_string();
    std::fs::remove_file(cache.data_path(&stem)).unwrap();
    let second = cache.materialise(h).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*second, expected);
}

#[test]
fn test_materialise_blank_needs_no_file() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.create_blank(meta(CfKind::Cf, 0.0, 1.0, 0, 0));
    cache.persist(h, false).unwrap();

    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&key(CfKind::Cf, 0.0, 0, 0)).unwrap();
    let stem = cache.entry(h).unwrap().stem().to_string();
    std::fs::remove_file(cache.data_path(&stem)).unwrap();
    let p = cache.materialise(h).unwrap();
    assert_eq!(p.dim(), (1, 1, 1, 1));
    assert_abs_diff_eq!(p[(0, 0, 0, 0)].norm(), 0.0);
}

#[test]
fn test_materialise_missing_file() {
    let tmp = TempDir::new().unwrap();
    let m = meta(CfKind::Cf, 0.0, 1.0, 0, 0);
    {
        let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
        let h = cache.insert_filled(m.clone(), filled_payload(&m)).unwrap();
        cache.persist(h, false).unwrap();
    }
    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&m.key()).unwrap();
    let stem = cache.entry(h).unwrap().stem().to_string();
    std::fs::remove_file(cache.data_path(&stem)).unwrap();

    let result = cache.materialise(h);
    assert!(matches!(
        result,
        Err(CfCacheError::StorageUnavailable { .. })
    ));
    // Nothing was cached by the failure.
    assert!(!cache.entry(h).unwrap().is_materialised());
}

#[test]
fn test_materialise_detects_shape_mismatch() {
    let tmp = TempDir::new().unwrap();
    let m = meta(CfKind::Cf, 0.0, 1.0, 0, 0);
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.insert_filled(m.clone(), filled_payload(&m)).unwrap();
    cache.persist(h, false).unwrap();

    // Make the payload disagree with the metadata.
    let stem = cache.entry(h).unwrap().stem().to_string();
    let other = Array4::<c32>::zeros((1, 2, 3, 4));
    io::write_payload(&cache.data_path(&stem), "test", other.view()).unwrap();

    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&m.key()).unwrap();
    assert!(matches!(
        cache.materialise(h),
        Err(CfCacheError::CorruptEntry { .. })
    ));
}

#[test]
fn test_truncated_payload_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("x.cf");
    let payload = Array4::<c32>::zeros((1, 1, 2, 2));
    io::write_payload(&path, "test", payload.view()).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(matches!(
        io::read_payload(&path, "test"),
        Err(CfCacheError::CorruptEntry { .. })
    ));

    // Dimensions whose product overflows.
    io::write_payload(&path, "test", payload.view()).unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[12..20].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
    bytes[20..28].copy_from_slice(&4u64.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        io::read_payload(&path, "test"),
        Err(CfCacheError::CorruptEntry { .. })
    ));

    std::fs::write(&path, b"not a CF file at all, really not one").unwrap();
    assert!(matches!(
        io::read_payload(&path, "test"),
        Err(CfCacheError::CorruptEntry { .. })
    ));
}

#[test]
fn test_persist_refuses_to_overwrite() {
    let tmp = TempDir::new().unwrap();
    let m = meta(CfKind::Cf, 20.0, 1.0, 3, 4);
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.insert_filled(m.clone(), filled_payload(&m)).unwrap();
    cache.persist(h, false).unwrap();

    // A dry run in another process creates the same blank entry.
    let mut dry_run = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let blank = dry_run.create_blank(m.clone());
    assert!(matches!(
        dry_run.persist(blank, false),
        Err(CfCacheError::WouldOverwrite { .. })
    ));

    // The filled entry is intact.
    let mut reopened = ConvolutionFunctionCache::open(tmp.path(), false, None).unwrap();
    let h = reopened.lookup(&m.key()).unwrap();
    assert!(reopened.entry(h).unwrap().meta.filled);
    assert_eq!(*reopened.materialise(h).unwrap(), filled_payload(&m));

    // With the flag, it's allowed.
    dry_run.persist(blank, true).unwrap();
    let reopened = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = reopened.lookup(&m.key()).unwrap();
    assert!(!reopened.entry(h).unwrap().meta.filled);
}

#[test]
fn test_insert_filled_checks_shape() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let m = meta(CfKind::Cf, 0.0, 1.0, 0, 0);
    let result = cache.insert_filled(m, Array4::zeros((4, 2, 8, 7)));
    assert!(matches!(result, Err(CfCacheError::PayloadShape { .. })));
    assert!(cache.is_empty());
}

#[test]
fn test_superseded_entries_are_ignored() {
    let tmp = TempDir::new().unwrap();
    let m = meta(CfKind::Cf, 30.0, 2.0, 0, 0);
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.create_blank(m.clone());
    cache.persist(h, false).unwrap();
    let stem = cache.entry(h).unwrap().stem().to_string();

    // Keep a copy of the blank around under a different name, then fill the
    // original.
    for ext in [CF_META_EXT, CF_DATA_EXT] {
        std::fs::copy(
            tmp.path().join(format!("{stem}.{ext}")),
            tmp.path().join(format!("{stem}_old.{ext}")),
        )
        .unwrap();
    }
    cache.fill(h, filled_payload(&m)).unwrap();
    cache.persist(h, true).unwrap();

    let cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    assert_eq!(cache.len(), 1);
    let h = cache.lookup(&m.key()).unwrap();
    let e = cache.entry(h).unwrap();
    assert!(e.meta.filled);
    assert_eq!(e.stem(), stem);
}

#[test]
fn test_pa_selection_on_open() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    for pa in [-40.0, 0.0, 10.0, 50.0] {
        let h = cache.create_blank(meta(CfKind::Cf, pa, 5.0, 0, 0));
        cache.persist(h, false).unwrap();
    }

    let selection = PaSelection {
        pa_deg: 5.0,
        tolerance_deg: 6.0,
    };
    let cache = ConvolutionFunctionCache::open(tmp.path(), true, Some(selection)).unwrap();
    assert_eq!(cache.len(), 2);

    // A selection outside +-360 degrees selects everything.
    let selection = PaSelection {
        pa_deg: 400.0,
        tolerance_deg: 1.0,
    };
    let cache = ConvolutionFunctionCache::open(tmp.path(), true, Some(selection)).unwrap();
    assert_eq!(cache.len(), 4);
}

#[test]
fn test_open_skips_unreadable_metadata() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.create_blank(meta(CfKind::Cf, 0.0, 5.0, 0, 0));
    cache.persist(h, false).unwrap();
    std::fs::write(tmp.path().join("garbage.toml"), "kind = 3").unwrap();

    let cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_open_requires_a_directory() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        ConvolutionFunctionCache::open(tmp.path().join("nope"), true, None),
        Err(CfCacheError::BadCacheDir { .. })
    ));
}

#[test]
fn test_new_serials_follow_opened_ones() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    for pa in [0.0, 10.0, 20.0] {
        let h = cache.create_blank(meta(CfKind::Cf, pa, 1.0, 0, 0));
        cache.persist(h, false).unwrap();
    }
    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.create_blank(meta(CfKind::Cf, 30.0, 1.0, 0, 0));
    assert_eq!(cache.entry(h).unwrap().meta.serial, 3);
}

#[test]
fn test_new_cache_continues_serials_on_disk() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    for pa in [0.0, 10.0] {
        let h = cache.create_blank(meta(CfKind::Cf, pa, 1.0, 0, 0));
        cache.persist(h, false).unwrap();
    }

    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    assert!(cache.is_empty());
    let h = cache.create_blank(meta(CfKind::Cf, 20.0, 1.0, 0, 0));
    assert_eq!(cache.entry(h).unwrap().meta.serial, 2);
}

#[test]
fn test_latest_fill_wins_across_dry_runs() {
    let tmp = TempDir::new().unwrap();
    let older = meta(CfKind::Cf, 10.0, 1.0, 0, 0);
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.create_blank(older.clone());
    cache.persist(h, false).unwrap();
    fill_from_list(tmp.path(), &DirectorySelector, "*", &UnitKernel, false).unwrap();

    // A later dry run makes an entry with the same key but a different
    // file name, which is then filled.
    let mut newer = older.clone();
    newer.mueller_elements = vec![0];
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let h = cache.create_blank(newer.clone());
    cache.persist(h, false).unwrap();
    let summary = fill_from_list(tmp.path(), &DirectorySelector, "*", &UnitKernel, false).unwrap();
    assert_eq!(summary.filled, 1);
    assert_eq!(summary.skipped, 1);

    let cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    assert_eq!(cache.len(), 1);
    let h = cache.lookup(&older.key()).unwrap();
    let e = cache.entry(h).unwrap();
    assert!(e.meta.filled);
    assert_eq!(e.meta.mueller_elements, vec![0]);
    assert_eq!(e.meta.shape, [1, 2, 8, 8]);

    // Refilling the older entry makes it the live one again.
    fill_from_list(
        tmp.path(),
        &DirectorySelector,
        "CFS_0_0_M0-5-10-15_*",
        &UnitKernel,
        true,
    )
    .unwrap();
    let cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&older.key()).unwrap();
    assert_eq!(
        cache.entry(h).unwrap().meta.mueller_elements,
        vec![0, 5, 10, 15]
    );
}

#[test]
fn test_nearest_freq_index() {
    let m = meta(CfKind::Cf, 0.0, 1.0, 0, 0);
    assert_eq!(m.nearest_freq_index(100e6), Some(0));
    assert_eq!(m.nearest_freq_index(156e6), Some(1));
    assert_eq!(m.nearest_freq_index(200e6), Some(1));
}

#[test]
fn test_directory_selector() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    for (kind, pa) in [(CfKind::Cf, 0.0), (CfKind::Cf, 10.0), (CfKind::WeightCf, 0.0)] {
        let h = cache.create_blank(meta(kind, pa, 1.0, 0, 0));
        cache.persist(h, false).unwrap();
    }

    let all = DirectorySelector.select(tmp.path(), "*").unwrap();
    assert_eq!(all.len(), 3);
    let cfs = DirectorySelector.select(tmp.path(), "CFS_*").unwrap();
    assert_eq!(
        cfs,
        vec![
            "CFS_0_0_M0-5-10-15_PA+000.0000".to_string(),
            "CFS_0_0_M0-5-10-15_PA+010.0000".to_string(),
        ]
    );
    assert!(DirectorySelector
        .select(tmp.path(), "nothing*")
        .unwrap()
        .is_empty());
}

#[test]
fn test_fill_from_list() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let metas = [
        meta(CfKind::Cf, 0.0, 1.0, 0, 0),
        meta(CfKind::Cf, 10.0, 1.0, 0, 1),
        meta(CfKind::WeightCf, 0.0, 1.0, 0, 0),
    ];
    for m in &metas {
        let h = cache.create_blank(m.clone());
        cache.persist(h, false).unwrap();
    }

    let summary =
        fill_from_list(tmp.path(), &DirectorySelector, "CFS_*", &UnitKernel, false).unwrap();
    assert_eq!(
        summary,
        FillSummary {
            filled: 2,
            skipped: 0,
            failed: 0
        }
    );

    let mut cache = ConvolutionFunctionCache::open(tmp.path(), true, None).unwrap();
    let h = cache.lookup(&metas[1].key()).unwrap();
    let e = cache.entry(h).unwrap();
    assert!(e.meta.filled);
    assert_eq!(e.meta.shape, [4, 2, 8, 8]);
    assert_eq!(
        e.meta.provenance.get("model").map(|s| s.as_str()),
        Some("unit")
    );
    let p = cache.materialise(h).unwrap();
    assert_abs_diff_eq!(p[(0, 1, 4, 4)].re, 1.0);
    assert_abs_diff_eq!(p[(0, 1, 4, 5)].re, 0.0);
    // The weighting function wasn't selected.
    let h = cache.lookup(&metas[2].key()).unwrap();
    assert!(!cache.entry(h).unwrap().meta.filled);

    // A second pass skips what's filled, unless overwriting.
    let gaussian = GaussianAperture::new(1.5, 0.5, 150e6);
    let summary = fill_from_list(tmp.path(), &DirectorySelector, "*", &gaussian, false).unwrap();
    assert_eq!(
        summary,
        FillSummary {
            filled: 1,
            skipped: 2,
            failed: 0
        }
    );
    let summary = fill_from_list(tmp.path(), &DirectorySelector, "*", &gaussian, true).unwrap();
    assert_eq!(summary.filled, 3);
}

#[test]
fn test_fill_from_list_rejects_empty_selections() {
    let tmp = TempDir::new().unwrap();
    let result = fill_from_list(tmp.path(), &DirectorySelector, "CFS_*", &UnitKernel, false);
    assert!(matches!(result, Err(FillError::EmptySelection { .. })));
}

#[test]
fn test_fill_failures_are_counted() {
    let tmp = TempDir::new().unwrap();
    let mut cache = ConvolutionFunctionCache::new(tmp.path()).unwrap();
    let mut bad = meta(CfKind::Cf, 0.0, 1.0, 0, 0);
    bad.freqs_hz.clear();
    let h = cache.create_blank(bad);
    cache.persist(h, false).unwrap();
    let h = cache.create_blank(meta(CfKind::Cf, 5.0, 1.0, 0, 0));
    cache.persist(h, false).unwrap();

    let summary = fill_from_list(tmp.path(), &DirectorySelector, "*", &UnitKernel, false).unwrap();
    assert_eq!(summary.filled, 1);
    assert_eq!(summary.failed, 1);
}
