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
//! # Withdraw Configuration Module 🕸️
//!
//! A module for configuring the withdraw coordinator.
//!
//! ## Overview
//!
//! Possible configuration include:
//! * `leaves`: how pool leaves are paged from chains.
//! * `relayer`: the relayers to discover and how long they get to relay.
//! * `reconcile`: how stale cross-chain roots are refetched.
//! * `pools`: the pools notes are withdrawn from, per chain, asset and amount.
//! * `evm`: EVM chains read and submitted to through their json-rpc endpoint.
//! * `substrate`: Substrate nodes the mixer leaves are read from.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ethereum_types::H256;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{PoolId, TypedChainId};

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Utils for processing configuration
pub mod utils;

/// The package identifier, used to find the default config and data dirs.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "webb-withdraw"];

/// Leaves are requested 512 at a time by default.
const fn default_page_size() -> u32 {
    crate::leaves::DEFAULT_PAGE_SIZE
}
/// Relayers get 60 seconds to finish a withdrawal by default.
const fn default_relayer_timeout() -> u64 {
    60
}
/// Stale roots are refetched 3 times by default.
const fn default_max_retries() -> usize {
    crate::reconcile::DEFAULT_MAX_RETRIES
}
/// Stale roots are refetched every second by default.
const fn default_retry_interval_ms() -> u64 {
    1_000
}
/// The withdraw events channel keeps 64 events by default.
const fn default_events_capacity() -> usize {
    64
}
/// Pending transactions are polled every second by default.
const fn default_tx_poll_interval_ms() -> u64 {
    1_000
}

/// WithdrawConfig is the configuration of the withdraw coordinator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WithdrawConfig {
    /// Leaves sync configuration.
    #[serde(default)]
    pub leaves: LeavesConfig,
    /// Relayers configuration.
    #[serde(default)]
    pub relayer: RelayerConfig,
    /// Cross-chain root reconciliation configuration.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// How many events a slow subscriber may lag behind before missing
    /// some.
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// The pools we can withdraw from.
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    /// EVM based chains, keyed by name.
    #[serde(default)]
    pub evm: HashMap<String, EvmChainConfig>,
    /// Substrate based chains, keyed by name.
    #[serde(default)]
    pub substrate: HashMap<String, SubstrateNodeConfig>,
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            leaves: LeavesConfig::default(),
            relayer: RelayerConfig::default(),
            reconcile: ReconcileConfig::default(),
            events_capacity: default_events_capacity(),
            pools: Vec::new(),
            evm: HashMap::new(),
            substrate: HashMap::new(),
        }
    }
}

/// LeavesConfig is the configuration of the leaves synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LeavesConfig {
    /// How many leaves are requested at once.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for LeavesConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// RelayerConfig lists the relayers used for withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// The base urls of the relayers.
    #[serde(default)]
    pub endpoints: Vec<Url>,
    /// Seconds a relayer gets to finish a withdrawal.
    #[serde(default = "default_relayer_timeout")]
    pub timeout: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout: default_relayer_timeout(),
        }
    }
}

impl RelayerConfig {
    /// The relayer timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// ReconcileConfig controls how stale cross-chain roots are refetched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReconcileConfig {
    /// How many times fresh roots are fetched after a stale one.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Milliseconds between two root fetches.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl ReconcileConfig {
    /// The wait between two root fetches.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// PoolConfig locates the pool holding deposits of one asset and amount on
/// a chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    /// The chain, like `evm:5001` or `substrate:1080`.
    pub chain: TypedChainId,
    /// The pool asset.
    pub token_symbol: String,
    /// The deposit amount, as written in notes.
    pub amount: String,
    /// The pool address, or tree id for Substrate mixers.
    pub address: String,
    /// The block the pool contract was deployed at. EVM deposits are
    /// searched from there.
    #[serde(default)]
    pub deployed_at: u64,
    /// The deposit size in the asset's smallest unit, for pools that cannot
    /// report it themselves, like Substrate mixers.
    #[serde(default)]
    pub denomination: Option<String>,
}

/// EvmChainConfig is the configuration of one EVM chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmChainConfig {
    /// The chain id, like `5001`.
    pub chain_id: u32,
    /// Http(s) json-rpc endpoint of the chain.
    pub http_endpoint: Url,
    /// The key self-submitting withdrawals, as a `0x` hex string or a
    /// `$ENV_VAR` holding one.
    #[serde(default, skip_serializing)]
    pub private_key: Option<PrivateKey>,
    /// Milliseconds between two polls of a pending transaction.
    #[serde(default = "default_tx_poll_interval_ms")]
    pub tx_poll_interval_ms: u64,
}

impl EvmChainConfig {
    /// The wait between two polls of a pending transaction.
    pub fn tx_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tx_poll_interval_ms)
    }
}

/// SubstrateNodeConfig is the configuration of one Substrate chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubstrateNodeConfig {
    /// The chain id, like `1080`.
    pub chain_id: u32,
    /// Http(s) json-rpc endpoint of the node.
    pub http_endpoint: Url,
}

/// A secp256k1 private key, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(H256);

impl PrivateKey {
    /// The raw key.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVistor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVistor {
            type Value = H256;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let hex = if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?
                } else {
                    value.to_owned()
                };
                let digits = hex.strip_prefix("0x").ok_or_else(|| {
                    serde::de::Error::custom(
                        "expected a 0x prefixed hex string or a $ENV_VAR",
                    )
                })?;
                if digits.len() != 64 {
                    return Err(serde::de::Error::custom(format!(
                        "got {} hex digits but expected 64",
                        digits.len()
                    )));
                }
                H256::from_str(digits).map_err(serde::de::Error::custom)
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVistor)?;
        Ok(Self(secret))
    }
}

impl PoolConfig {
    /// The id of the pool.
    pub fn pool_id(&self) -> PoolId {
        PoolId::new(self.chain, self.address.clone())
    }
}

impl WithdrawConfig {
    /// The configured pools of `chain_id`.
    pub fn pools_of(
        &self,
        chain_id: TypedChainId,
    ) -> impl Iterator<Item = &PoolConfig> {
        self.pools.iter().filter(move |p| p.chain == chain_id)
    }

    /// The pool holding `amount` of `token_symbol` on `chain_id`.
    ///
    /// Symbols are compared ignoring case.
    pub fn resolve_pool(
        &self,
        chain_id: TypedChainId,
        token_symbol: &str,
        amount: &str,
    ) -> crate::Result<PoolId> {
        self.pools
            .iter()
            .find(|p| {
                p.chain == chain_id
                    && p.token_symbol.eq_ignore_ascii_case(token_symbol)
                    && p.amount == amount
            })
            .map(PoolConfig::pool_id)
            .ok_or_else(|| crate::Error::PoolNotFound {
                chain_id,
                token_symbol: token_symbol.to_owned(),
                amount: amount.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() -> anyhow::Result<()> {
        let config: WithdrawConfig = serde_json::from_str("{}")?;
        assert_eq!(config, WithdrawConfig::default());
        assert_eq!(config.leaves.page_size, 512);
        assert_eq!(config.relayer.timeout(), Duration::from_secs(60));
        assert_eq!(config.reconcile.max_retries, 3);
        assert_eq!(config.events_capacity, 64);
        Ok(())
    }

    #[test]
    fn resolves_pools_by_chain_asset_and_amount() -> anyhow::Result<()> {
        let config: WithdrawConfig = serde_json::from_value(serde_json::json!({
            "pools": [
                {
                    "chain": "substrate:1080",
                    "token-symbol": "WEBB",
                    "amount": "100",
                    "address": "0"
                },
                {
                    "chain": "evm:5001",
                    "token-symbol": "WEBB",
                    "amount": "1",
                    "address": "0xD24260C102B5D128cbEFA0F655E5be3c2370677C"
                }
            ]
        }))?;
        let pool =
            config.resolve_pool(TypedChainId::Evm(5001), "webb", "1")?;
        assert_eq!(pool.address, "0xd24260c102b5d128cbefa0f655e5be3c2370677c");
        let err = config
            .resolve_pool(TypedChainId::Substrate(1080), "WEBB", "10")
            .unwrap_err();
        assert!(matches!(err, crate::Error::PoolNotFound { .. }));
        Ok(())
    }

    #[test]
    fn reads_chains_and_private_keys_from_env() -> anyhow::Result<()> {
        let key = format!("0x{}", "ab".repeat(32));
        std::env::set_var("WEBB_WITHDRAW_TEST_KEY", &key);
        let config: WithdrawConfig = serde_json::from_value(serde_json::json!({
            "evm": {
                "hermes": {
                    "chain-id": 5001,
                    "http-endpoint": "http://localhost:5001",
                    "private-key": "$WEBB_WITHDRAW_TEST_KEY"
                },
                "athena": {
                    "chain-id": 5002,
                    "http-endpoint": "http://localhost:5002",
                    "private-key": key
                }
            },
            "substrate": {
                "webb": {
                    "chain-id": 1080,
                    "http-endpoint": "http://localhost:9933"
                }
            }
        }))?;
        let hermes = &config.evm["hermes"];
        assert_eq!(hermes.private_key, config.evm["athena"].private_key);
        assert_eq!(
            hermes.private_key.as_ref().map(PrivateKey::as_bytes),
            Some(&[0xab; 32][..])
        );
        assert_eq!(hermes.tx_poll_interval(), Duration::from_secs(1));
        assert_eq!(format!("{:?}", hermes.private_key), "Some(PrivateKey(..))");
        assert_eq!(config.substrate["webb"].chain_id, 1080);

        let short = serde_json::json!({
            "chain-id": 1,
            "http-endpoint": "http://localhost:8545",
            "private-key": "0x1234"
        });
        assert!(serde_json::from_value::<EvmChainConfig>(short).is_err());
        Ok(())
    }
}
