// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
use std::path::{Path, PathBuf};

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use super::{WithdrawConfig, PACKAGE_ID};
use crate::store::SledLeafCache;
use crate::types::TypedChainId;

/// The Webb Withdraw Command-line tool
///
/// Start the tool from a config directory:
///
/// $ webb-withdraw -vvv -c <CONFIG_DIR_PATH> inspect-note <NOTE>
#[derive(StructOpt)]
#[structopt(name = "Webb Withdraw")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Create the leaves cache in a temporary directory.
    /// and will be deleted when the process exits.
    #[structopt(long)]
    pub tmp: bool,
    /// What to do.
    #[structopt(subcommand)]
    pub command: Command,
}

/// The commands of the tool.
#[derive(StructOpt, Debug)]
pub enum Command {
    /// Decodes a note and prints its public parts.
    InspectNote {
        /// The note string.
        note: String,
    },
    /// Lists the configured relayers and what they support.
    Relayers {
        /// Only relayers active on this chain, like `evm:5001`.
        #[structopt(long)]
        chain: Option<TypedChainId>,
    },
    /// Quotes the fee every relayer takes for withdrawing a note.
    Fee {
        /// The note string.
        note: String,
    },
    /// Fetches the leaves of a pool from its chain, or through a relayer's
    /// leaves cache when the chain is not configured.
    Leaves {
        /// The chain of the pool, like `substrate:1080`.
        chain: TypedChainId,
        /// The pool address or tree id.
        address: String,
    },
    /// Reads the latest root, neighbor roots and denomination of a pool.
    Roots {
        /// The chain of the pool, like `evm:5001`.
        chain: TypedChainId,
        /// The pool address or tree id.
        address: String,
    },
}

/// Loads the configuration from the given directory.
///
/// Without a directory the platform config dir of the tool is used.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<WithdrawConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for webb withdraw");
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => dirs.config_dir().to_path_buf(),
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let v = super::utils::load(path)?;
    tracing::trace!("Config loaded..");
    Ok(v)
}

/// Sets up the logger, based on the verbosity level passed in.
///
/// Both the crate logs and the probe events follow the verbosity.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive_1 = format!("webb_withdraw={log_level}").parse()?;
    let directive_2 =
        format!("{}={log_level}", crate::probe::TARGET).parse()?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive_1)
        .add_directive(directive_2);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.init();
    Ok(())
}

/// Opens the leaves cache, in a temporary directory with `--tmp`.
pub fn create_store(opts: &Opts) -> anyhow::Result<SledLeafCache> {
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        return Ok(SledLeafCache::temporary()?);
    }
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let db_path = match opts.config_dir.as_ref().and_then(|p| p.parent()) {
        Some(parent) => parent.join("store"),
        None => dirs.data_local_dir().join("store"),
    };
    tracing::debug!("Opening leaves cache at {}", db_path.display());
    Ok(SledLeafCache::open(db_path)?)
}
