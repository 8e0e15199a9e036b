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
use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Deserialize;
use url::Url;

use super::{
    RelayerCapabilities, RelayerQuery, SupportedChain, SupportedContract,
};
use crate::types::{PoolId, TypedChainId};

/// Fetches what a relayer supports.
#[async_trait::async_trait]
pub trait RelayerInfoSource: Send + Sync {
    /// The capabilities of the relayer at `endpoint`.
    async fn fetch_capabilities(
        &self,
        endpoint: &Url,
    ) -> crate::Result<RelayerCapabilities>;
}

/// A contract entry of the relayer info endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractInfo {
    address: String,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default, alias = "token-symbol")]
    token_symbol: Option<String>,
    #[serde(default, alias = "withdraw-fee-percentage")]
    withdraw_fee_percentage: Option<f64>,
}

/// A pallet entry of the relayer info endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PalletInfo {
    #[serde(alias = "tree-id")]
    tree_id: u32,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default, alias = "token-symbol")]
    token_symbol: Option<String>,
    #[serde(default, alias = "withdraw-fee-percentage")]
    withdraw_fee_percentage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvmChainInfo {
    #[serde(alias = "chain-id")]
    chain_id: u32,
    #[serde(default)]
    beneficiary: Option<String>,
    #[serde(default)]
    contracts: Vec<ContractInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubstrateChainInfo {
    #[serde(alias = "chain-id")]
    chain_id: u32,
    #[serde(default)]
    beneficiary: Option<String>,
    #[serde(default)]
    pallets: Vec<PalletInfo>,
}

/// The body of `GET /api/v1/info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerInfo {
    #[serde(default)]
    evm: HashMap<String, EvmChainInfo>,
    #[serde(default)]
    substrate: HashMap<String, SubstrateChainInfo>,
}

impl RelayerInfo {
    /// The capabilities declared in this info, for the relayer at
    /// `endpoint`.
    ///
    /// Pools without a withdraw fee are not relayed and are left out, as
    /// are chains left without any pool.
    pub fn into_capabilities(self, endpoint: Url) -> RelayerCapabilities {
        let evm = self.evm.into_values().map(|chain| SupportedChain {
            chain_id: TypedChainId::Evm(chain.chain_id),
            beneficiary: chain.beneficiary,
            contracts: chain
                .contracts
                .into_iter()
                .filter_map(|c| {
                    Some(SupportedContract {
                        withdraw_fee_percentage: c.withdraw_fee_percentage?,
                        address: c.address,
                        size: c.size,
                        token_symbol: c.token_symbol,
                    })
                })
                .collect(),
        });
        let substrate =
            self.substrate.into_values().map(|chain| SupportedChain {
                chain_id: TypedChainId::Substrate(chain.chain_id),
                beneficiary: chain.beneficiary,
                contracts: chain
                    .pallets
                    .into_iter()
                    .filter_map(|p| {
                        Some(SupportedContract {
                            withdraw_fee_percentage: p
                                .withdraw_fee_percentage?,
                            address: p.tree_id.to_string(),
                            size: p.size,
                            token_symbol: p.token_symbol,
                        })
                    })
                    .collect(),
            });
        let mut chains: Vec<_> = evm
            .chain(substrate)
            .filter(|c| !c.contracts.is_empty())
            .collect();
        chains.sort_by_key(|c| c.chain_id.chain_id());
        RelayerCapabilities { endpoint, chains }
    }
}

/// Reads relayer capabilities from their HTTP info endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpRelayerInfoSource {
    client: reqwest::Client,
}

impl HttpRelayerInfoSource {
    /// A source sharing `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl RelayerInfoSource for HttpRelayerInfoSource {
    #[tracing::instrument(skip(self), fields(endpoint = %endpoint))]
    async fn fetch_capabilities(
        &self,
        endpoint: &Url,
    ) -> crate::Result<RelayerCapabilities> {
        let url = endpoint.join("/api/v1/info")?;
        let info: RelayerInfo = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.into_capabilities(endpoint.clone()))
    }
}

/// Knows the configured relayers, and which of them fit a withdrawal.
#[derive(Clone)]
pub struct RelayerManager {
    endpoints: Vec<Url>,
    source: Arc<dyn RelayerInfoSource>,
}

impl RelayerManager {
    /// A manager over the relayers at `endpoints`.
    pub fn new(endpoints: Vec<Url>, source: Arc<dyn RelayerInfoSource>) -> Self {
        Self { endpoints, source }
    }

    /// The configured relayer endpoints.
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// The capabilities of every reachable relayer.
    ///
    /// Relayers are queried concurrently. One that cannot be reached is
    /// skipped.
    pub async fn relayers(&self) -> Vec<RelayerCapabilities> {
        let fetches = self
            .endpoints
            .iter()
            .map(|endpoint| self.source.fetch_capabilities(endpoint));
        let results = futures::future::join_all(fetches).await;
        let mut relayers = Vec::with_capacity(results.len());
        for (endpoint, result) in self.endpoints.iter().zip(results) {
            match result {
                Ok(capabilities) => relayers.push(capabilities),
                Err(e) => {
                    tracing::event!(
                        target: crate::probe::TARGET,
                        tracing::Level::WARN,
                        kind = %crate::probe::Kind::Relayer,
                        endpoint = %endpoint,
                        error = %e,
                        reachable = false,
                    );
                    tracing::warn!(
                        "Skipping relayer {}: {}",
                        endpoint,
                        e
                    );
                }
            }
        }
        relayers
    }

    /// The reachable relayers fitting `query`.
    pub async fn discover(
        &self,
        query: &RelayerQuery,
    ) -> Vec<RelayerCapabilities> {
        let found: Vec<_> = self
            .relayers()
            .await
            .into_iter()
            .filter(|r| r.matches(query))
            .collect();
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Relayer,
            chain_id = %query.chain_id,
            found = found.len(),
        );
        found
    }

    /// A random relayer relaying for `pool`.
    pub async fn random_for_pool(
        &self,
        pool: &PoolId,
    ) -> Option<RelayerCapabilities> {
        let query = RelayerQuery {
            address: Some(pool.address.clone()),
            ..RelayerQuery::chain(pool.chain_id)
        };
        select_random(&self.discover(&query).await)
    }
}

/// Picks one of `candidates` at random.
pub fn select_random(
    candidates: &[RelayerCapabilities],
) -> Option<RelayerCapabilities> {
    candidates.choose(&mut rand::thread_rng()).cloned()
}
