// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod cache_lifecycle;

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};

fn cfcache() -> Command {
    Command::cargo_bin("cfcache").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// Run a command, returning whether it succeeded along with its stdout and
/// stderr.
fn run(cmd: &mut Command) -> (bool, String, String) {
    let result = cmd.ok();
    let success = result.is_ok();
    let (stdout, stderr) = get_cmd_output(result);
    (success, stdout, stderr)
}

fn make_file_in_dir<T: AsRef<Path>, U: AsRef<Path>>(filename: T, dir: U) -> (PathBuf, File) {
    let path = dir.as_ref().join(filename);
    let f = File::create(&path).expect("couldn't make file");
    (path, f)
}

/// Write a dry-run argument file that makes blank entries at PAs -10, 0 and
/// 10 degrees for antenna-type pairs 0-0 and 0-1 in `cache_dir`.
fn write_dry_run_args<P: AsRef<Path>>(dir: P, cache_dir: &Path) -> PathBuf {
    let (path, mut f) = make_file_in_dir("dry_run.toml", dir);
    writeln!(
        f,
        r#"cache_dir = "{}"
pas_deg = [-10.0, 0.0, 10.0]
pa_tolerance_deg = 2.0
ant_type_pairs = ["0-0", "0-1"]
mueller_elements = [0, 5, 10, 15]
freqs_hz = [150e6, 200e6]
oversampling = 4
support_size = 8"#,
        cache_dir.display()
    )
    .unwrap();
    path
}
