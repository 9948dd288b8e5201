// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the dry-run -> fill -> summarise cycle of a CF cache.

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use crate::*;
use cfcache::{CfKey, CfKind, ConvolutionFunctionCache};

#[test]
fn test_dry_run_fill_summarise() {
    let tmp_dir = TempDir::new().unwrap();
    let cache_dir = tmp_dir.path().join("cfs");
    let args_file = write_dry_run_args(tmp_dir.path(), &cache_dir);

    let (ok, stdout, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars"])
        .arg(&args_file));
    assert!(ok, "dry-run failed: {stderr}");
    assert!(stdout.contains("Created 6 blank CF entries"), "{stdout}");
    assert!(cache_dir
        .join("CFS_0_1_M0-5-10-15_PA-010.0000.toml")
        .exists());
    assert!(cache_dir.join("CFS_0_0_M0-5-10-15_PA+000.0000.cf").exists());

    let (ok, stdout, stderr) = run(cfcache()
        .args(["fill", "--no-progress-bars", "--model", "unit", "-d"])
        .arg(&cache_dir));
    assert!(ok, "fill failed: {stderr}");
    assert!(stdout.contains("Filled 6 entries"), "{stdout}");

    let (ok, stdout, stderr) = run(cfcache().arg("summarise").arg(&cache_dir));
    assert!(ok, "summarise failed: {stderr}");
    assert!(stdout.contains("6 of 6 entries are filled"), "{stdout}");

    // The filled entries can now be found and read by a lazily-opened cache.
    let mut cache = ConvolutionFunctionCache::open(&cache_dir, true, None).unwrap();
    assert_eq!(cache.len(), 6);
    let handle = cache
        .lookup(&CfKey {
            kind: CfKind::Cf,
            pa_deg: 9.2,
            ant_type1: 0,
            ant_type2: 1,
        })
        .unwrap();
    assert_abs_diff_eq!(
        cache.entry(handle).unwrap().meta.parallactic_angle_deg,
        10.0
    );
    let payload = cache.materialise(handle).unwrap();
    assert_eq!(payload.dim(), (4, 2, 8, 8));
    assert_abs_diff_eq!(payload[(0, 1, 4, 4)].re, 1.0);
    assert_abs_diff_eq!(payload[(1, 1, 4, 4)].re, 0.0);
    assert_abs_diff_eq!(payload[(0, 1, 3, 4)].re, 0.0);

    // Nothing exists for antenna types 1-1, nor for a PA outside every
    // tolerance.
    assert!(cache
        .lookup(&CfKey {
            kind: CfKind::Cf,
            pa_deg: 0.0,
            ant_type1: 1,
            ant_type2: 1,
        })
        .is_none());
    assert!(cache
        .lookup(&CfKey {
            kind: CfKind::Cf,
            pa_deg: 5.0,
            ant_type1: 0,
            ant_type2: 0,
        })
        .is_none());
}

#[test]
fn test_dry_run_refuses_to_overwrite() {
    let tmp_dir = TempDir::new().unwrap();
    let cache_dir = tmp_dir.path().join("cfs");
    let args_file = write_dry_run_args(tmp_dir.path(), &cache_dir);

    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars"])
        .arg(&args_file));
    assert!(ok, "dry-run failed: {stderr}");

    // Fill one entry, then make sure a second dry run can't blank it.
    let (ok, _, stderr) = run(cfcache()
        .args([
            "fill",
            "--no-progress-bars",
            "--pattern",
            "CFS_0_0_*_PA+000.0000",
            "-d",
        ])
        .arg(&cache_dir));
    assert!(ok, "fill failed: {stderr}");

    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars"])
        .arg(&args_file));
    assert!(!ok);
    assert!(stderr.contains("Refusing to overwrite"), "{stderr}");

    let cache = ConvolutionFunctionCache::open(&cache_dir, true, None).unwrap();
    assert_eq!(cache.entries().filter(|(_, e)| e.meta.filled).count(), 1);

    // With an explicit overwrite, the entries are all blank again.
    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars", "--overwrite"])
        .arg(&args_file));
    assert!(ok, "dry-run failed: {stderr}");
    let cache = ConvolutionFunctionCache::open(&cache_dir, true, None).unwrap();
    assert_eq!(cache.entries().filter(|(_, e)| e.meta.filled).count(), 0);
}

#[test]
fn test_fill_with_empty_selection_fails() {
    let tmp_dir = TempDir::new().unwrap();
    let cache_dir = tmp_dir.path().join("cfs");
    let args_file = write_dry_run_args(tmp_dir.path(), &cache_dir);
    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars"])
        .arg(&args_file));
    assert!(ok, "dry-run failed: {stderr}");

    let (ok, _, stderr) = run(cfcache()
        .args(["fill", "--no-progress-bars", "--pattern", "WTCFS_*", "-d"])
        .arg(&cache_dir));
    assert!(!ok);
    assert!(stderr.contains("matched no CF entries"), "{stderr}");
}

#[test]
fn test_save_toml_reproduces_arguments() {
    let tmp_dir = TempDir::new().unwrap();
    let cache_dir = tmp_dir.path().join("cfs");
    let saved = tmp_dir.path().join("saved.toml");

    let (ok, stdout, stderr) = run(cfcache()
        .args([
            "dry-run",
            "--no-progress-bars",
            "--weights",
            "--support-size",
            "4",
            "--freqs-hz",
            "150e6",
            "-d",
        ])
        .arg(&cache_dir)
        .arg("--save-toml")
        .arg(&saved)
        .args(["--pas-deg", "0"]));
    assert!(ok, "dry-run failed: {stderr}");
    assert!(stdout.contains("Created 2 blank CF entries"), "{stdout}");

    let contents = std::fs::read_to_string(&saved).unwrap();
    assert!(contents.contains("support_size = 4"), "{contents}");
    assert!(contents.contains("weights = true"), "{contents}");

    // Running again from the saved arguments needs an overwrite.
    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars"])
        .arg(&saved));
    assert!(!ok);
    assert!(stderr.contains("Refusing to overwrite"), "{stderr}");
    let (ok, _, stderr) = run(cfcache()
        .args(["dry-run", "--no-progress-bars", "--overwrite"])
        .arg(&saved));
    assert!(ok, "dry-run failed: {stderr}");
}

#[test]
fn test_summarise_missing_dir_fails() {
    let tmp_dir = TempDir::new().unwrap();
    let (ok, _, stderr) = run(cfcache().arg("summarise").arg(tmp_dir.path().join("nope")));
    assert!(!ok);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}
