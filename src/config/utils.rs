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
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Config, File};

use super::WithdrawConfig;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> crate::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(crate::Error::from))
        .collect()
}

/// Try to parse the [`WithdrawConfig`] from the given config file(s).
pub fn parse_from_files(files: &[PathBuf]) -> crate::Result<WithdrawConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of WEBB).
    let builder = builder
        .add_source(config::Environment::with_prefix("WEBB").separator("_"));
    let cfg = builder.build()?;
    let config: Result<
        WithdrawConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Loads the configuration files found under `path`.
///
/// it is the same as using the [`search_config_files`] and
/// [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<WithdrawConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// Validates the configuration and standardizes its format.
pub fn postloading_process(
    mut config: WithdrawConfig,
) -> crate::Result<WithdrawConfig> {
    tracing::trace!("Checking configration sanity ...");
    if config.leaves.page_size == 0 {
        return Err(crate::Error::Generic("leaves page-size must be at least 1"));
    }
    if config.events_capacity == 0 {
        return Err(crate::Error::Generic("events-capacity must be at least 1"));
    }
    for endpoint in &config.relayer.endpoints {
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(crate::Error::Generic(
                "relayer endpoints must be http(s) urls",
            ));
        }
    }
    // evm addresses are compared in lower case everywhere
    for pool in config.pools.iter_mut() {
        pool.address = pool.pool_id().address;
    }
    let mut seen = HashSet::new();
    for pool in &config.pools {
        let key = (pool.chain, pool.token_symbol.to_lowercase(), &pool.amount);
        if !seen.insert(key) {
            tracing::warn!(
                "!!WARNING!!: pool {} {} on {} is configured more than once, \
                 the first entry wins",
                pool.amount,
                pool.token_symbol,
                pool.chain
            );
        }
    }
    tracing::trace!("Config is sane");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::types::TypedChainId;

    const CONFIG: &str = r#"
events-capacity = 16

[leaves]
page-size = 100

[relayer]
endpoints = ["https://relayer1.webb.tools", "http://localhost:9955"]
timeout = 30

[[pools]]
chain = "evm:5001"
token-symbol = "WEBB"
amount = "1"
address = "0xD24260C102B5D128cbEFA0F655E5be3c2370677C"
"#;

    #[test]
    fn loads_every_config_file_of_a_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::File::create(dir.path().join("main.toml"))?
            .write_all(CONFIG.as_bytes())?;
        std::fs::create_dir(dir.path().join("pools"))?;
        std::fs::File::create(dir.path().join("pools").join("reconcile.json"))?
            .write_all(br#"{"reconcile": {"max-retries": 5}}"#)?;

        let files = search_config_files(dir.path())?;
        assert_eq!(files.len(), 2);
        let config = load(dir.path())?;
        assert_eq!(config.events_capacity, 16);
        assert_eq!(config.leaves.page_size, 100);
        assert_eq!(config.relayer.endpoints.len(), 2);
        assert_eq!(config.relayer.timeout, 30);
        assert_eq!(config.reconcile.max_retries, 5);
        assert_eq!(config.reconcile.retry_interval_ms, 1_000);
        assert_eq!(config.pools[0].chain, TypedChainId::Evm(5001));
        assert_eq!(
            config.pools[0].address,
            "0xd24260c102b5d128cbefa0f655e5be3c2370677c"
        );
        Ok(())
    }

    #[test]
    fn reports_bad_values() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::File::create(dir.path().join("main.toml"))?
            .write_all(b"[leaves]\npage-size = 0\n")?;
        assert!(load(dir.path()).is_err());

        std::fs::File::create(dir.path().join("main.toml"))?
            .write_all(b"[[pools]]\nchain = \"cosmos:1\"\n")?;
        assert!(matches!(
            load(dir.path()),
            Err(crate::Error::ParseConfig(_))
        ));
        Ok(())
    }
}
