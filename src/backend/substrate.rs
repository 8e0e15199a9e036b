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
use std::fmt;
use std::sync::Arc;

use ethereum_types::{H256, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{
    ChainDataSource, LeavesSource, TransactionSubmitter, TxNotifier,
    WithdrawCall, WithdrawalBackend,
};
use crate::config::{PoolConfig, SubstrateNodeConfig};
use crate::leaves::DEFAULT_PAGE_SIZE;
use crate::merkle::{MerkleTree, PoseidonHasher};
use crate::types::{
    ChainFamily, Leaf, PoolId, SignerIdentity, TxReference, TypedChainId,
};

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl<T: DeserializeOwned> RpcResponse<T> {
    fn into_result(self, method: &str) -> crate::Result<T> {
        match (self.result, self.error) {
            (_, Some(e)) => Err(crate::Error::SyncUnavailable(format!(
                "{} failed with {}: {}",
                method, e.code, e.message
            ))),
            (Some(result), None) => Ok(result),
            (None, None) => Err(crate::Error::SyncUnavailable(format!(
                "{method} returned no result"
            ))),
        }
    }
}

/// A Substrate node running the mixer pallet, read over json-rpc.
///
/// Leaves come from the `mt_getLeaves` rpc of the merkle tree pallet, and
/// the latest root is the root of those leaves. Mixers are not linked to
/// other chains, so they have no neighbor roots.
///
/// Extrinsics are signed outside of this crate: self-submission goes
/// through the submitter given with [`SubstrateNode::with_submitter`].
pub struct SubstrateNode {
    chain_id: TypedChainId,
    client: reqwest::Client,
    endpoint: Url,
    hasher: PoseidonHasher,
    denominations: HashMap<PoolId, U256>,
    submitter: Option<Arc<dyn TransactionSubmitter>>,
}

impl fmt::Debug for SubstrateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstrateNode")
            .field("chain_id", &self.chain_id)
            .field("endpoint", &self.endpoint.as_str())
            .field("submits", &self.submitter.is_some())
            .finish()
    }
}

impl SubstrateNode {
    /// A node described by `config`, serving the `pools` of that chain.
    pub fn new(
        client: reqwest::Client,
        config: &SubstrateNodeConfig,
        pools: &[PoolConfig],
    ) -> crate::Result<Self> {
        let chain_id = TypedChainId::Substrate(config.chain_id);
        let mut denominations = HashMap::new();
        for pool in pools.iter().filter(|p| p.chain == chain_id) {
            if let Some(denomination) = &pool.denomination {
                let denomination = U256::from_dec_str(denomination)
                    .map_err(|_| {
                        crate::Error::Generic("pool denomination is not a number")
                    })?;
                denominations.insert(pool.pool_id(), denomination);
            }
        }
        Ok(Self {
            chain_id,
            client,
            endpoint: config.http_endpoint.clone(),
            hasher: PoseidonHasher::new(),
            denominations,
            submitter: None,
        })
    }

    /// Self-submits withdrawals through `submitter`.
    pub fn with_submitter(
        mut self,
        submitter: Arc<dyn TransactionSubmitter>,
    ) -> Self {
        self.submitter = Some(submitter);
        self
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> crate::Result<T> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| crate::Error::SyncUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| crate::Error::SyncUnavailable(e.to_string()))?;
        response.into_result(method)
    }

    fn tree_id(&self, pool: &PoolId) -> crate::Result<u32> {
        if pool.chain_id != self.chain_id {
            return Err(crate::Error::ChainNotFound {
                chain_id: pool.chain_id,
            });
        }
        pool.address
            .parse()
            .map_err(|_| crate::Error::Generic("mixer tree id must be a number"))
    }

    async fn all_leaves(&self, pool: &PoolId) -> crate::Result<Vec<Leaf>> {
        let mut leaves = Vec::new();
        loop {
            let from = leaves.len() as u32;
            let page = self
                .get_leaves(pool, from, from + DEFAULT_PAGE_SIZE)
                .await?;
            let done = page.len() < DEFAULT_PAGE_SIZE as usize;
            leaves.extend(page);
            if done {
                return Ok(leaves);
            }
        }
    }
}

#[async_trait::async_trait]
impl LeavesSource for SubstrateNode {
    async fn get_leaves(
        &self,
        pool: &PoolId,
        from: u32,
        to: u32,
    ) -> crate::Result<Vec<Leaf>> {
        let tree_id = self.tree_id(pool)?;
        self.rpc("mt_getLeaves", serde_json::json!([tree_id, from, to]))
            .await
    }
}

#[async_trait::async_trait]
impl ChainDataSource for SubstrateNode {
    async fn get_latest_root(&self, pool: &PoolId) -> crate::Result<H256> {
        let leaves = self.all_leaves(pool).await?;
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || {
            MerkleTree::new(&hasher, &leaves).map(|tree| tree.root())
        })
        .await
        .map_err(|e| {
            crate::Error::Hasher(format!("merkle task join failed: {e}"))
        })?
    }

    async fn get_neighbor_roots(
        &self,
        pool: &PoolId,
    ) -> crate::Result<Vec<H256>> {
        self.tree_id(pool)?;
        Ok(Vec::new())
    }

    async fn denomination(&self, pool: &PoolId) -> crate::Result<U256> {
        self.denominations
            .get(pool)
            .copied()
            .ok_or(crate::Error::Generic("pool has no denomination"))
    }
}

#[async_trait::async_trait]
impl TransactionSubmitter for SubstrateNode {
    async fn submit(
        &self,
        call: &WithdrawCall,
        signer: &SignerIdentity,
        notifier: &TxNotifier,
    ) -> crate::Result<TxReference> {
        match &self.submitter {
            Some(submitter) => submitter.submit(call, signer, notifier).await,
            None => Err(crate::Error::NoAccountAvailable),
        }
    }
}

impl WithdrawalBackend for SubstrateNode {
    fn family(&self) -> ChainFamily {
        ChainFamily::Substrate
    }
}
