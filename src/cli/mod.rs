// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `cfcache` command line and its logging setup. Each subcommand's
//! arguments live in their own module.
//!
//! Subcommand argument structs are also read from TOML/JSON argument files,
//! so their fields are `Option`s (or `#[serde(default)]` booleans) and get
//! merged with the command line before anything runs.

#[macro_use]
mod common;
mod dry_run;
mod error;
mod fill;
mod summarise;

pub use error::CfCacheToolError;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use clap::{AppSettings, Args, Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;

use crate::PROGRESS_BARS;

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    about = r#"Build, fill and inspect convolution-function caches for A-projection imaging"#
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(propagate_version = true)]
#[clap(infer_long_args = true)]
pub struct CfCacheTool {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    #[clap(global = true)]
    no_progress_bars: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    #[clap(global = true)]
    verbosity: u8,

    /// Save the input arguments into a new TOML file that can be used to
    /// reproduce this run.
    #[clap(long)]
    #[clap(global = true)]
    save_toml: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
#[clap(arg_required_else_help = true)]
enum Command {
    #[clap(about = "Print the entries of a CF cache and its memory usage.")]
    Summarise(summarise::SummariseArgs),

    #[clap(alias = "create-blanks")]
    #[clap(
        about = "Create blank CF entries on disk, ready to be given content by the 'fill' subcommand."
    )]
    DryRun(dry_run::DryRunArgs),

    #[clap(about = "Fill the blank CF entries in a cache directory with a CF model.")]
    Fill(fill::FillArgs),
}

impl CfCacheTool {
    pub fn run(self) -> Result<(), CfCacheToolError> {
        let GlobalArgs {
            verbosity,
            no_progress_bars,
            save_toml,
        } = self.global_opts;
        setup_logging(verbosity).expect("Failed to initialise logging.");
        if !no_progress_bars {
            PROGRESS_BARS.store(true);
        }

        let sub_command = match &self.command {
            Command::Summarise(_) => "summarise",
            Command::DryRun(_) => "dry-run",
            Command::Fill(_) => "fill",
        };
        info!("cfcache {} {}", sub_command, env!("CARGO_PKG_VERSION"));
        display_build_info();

        match self.command {
            Command::Summarise(args) => args.run()?,

            Command::DryRun(args) => {
                let args = args.merge()?;
                save_args(&args, save_toml)?;
                args.run()?;
            }

            Command::Fill(args) => {
                let args = args.merge()?;
                save_args(&args, save_toml)?;
                args.run()?;
            }
        }

        info!("cfcache {} complete.", sub_command);
        Ok(())
    }
}

/// Merged subcommand arguments, written out so the run can be repeated with
/// `cfcache <subcommand> <file>.toml`.
fn save_args<T: Serialize>(args: &T, path: Option<PathBuf>) -> Result<(), CfCacheToolError> {
    if let Some(path) = path {
        let mut f = BufWriter::new(File::create(&path)?);
        f.write_all(toml::to_string(args)?.as_bytes())?;
        info!("Saved arguments to '{}'", path.display());
    }
    Ok(())
}

/// Log to stdout. Verbosity 0 is info, 1 is debug and 2 is trace; 3 and up
/// also prints the module and line of each message.
fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .target(env_logger::Target::Stdout)
        .format_target(false)
        .filter_level(level);
    if verbosity >= 3 {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                record.args()
            )
        });
    }
    builder.try_init()
}

/// The git state and toolchain this binary was built with.
fn display_build_info() {
    let commit = GIT_COMMIT_HASH_SHORT.unwrap_or("<no git info>");
    let dirty = if GIT_DIRTY == Some(true) { " (dirty)" } else { "" };
    info!("Built from commit {commit}{dirty} at {BUILT_TIME_UTC}");
    if let Some(head) = GIT_HEAD_REF {
        debug!("Git head ref: {head}");
    }
    debug!("Compiler: {RUSTC_VERSION}");
}
