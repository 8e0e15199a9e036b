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
use ethereum_types::H256;
use parking_lot::Mutex;
use serde::Deserialize;
use url::Url;

use crate::backend::LeavesSource;
use crate::types::{Leaf, PoolId};

/// A leaf as served by relayers: either raw bytes or a hex string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireLeaf {
    Bytes(Vec<u8>),
    Hex(H256),
}

impl WireLeaf {
    fn into_leaf(self) -> crate::Result<Leaf> {
        match self {
            Self::Bytes(bytes) if bytes.len() == 32 => {
                Ok(H256::from_slice(&bytes))
            }
            Self::Bytes(bytes) => Err(crate::Error::SyncUnavailable(format!(
                "relayer served a leaf of {} bytes",
                bytes.len()
            ))),
            Self::Hex(leaf) => Ok(leaf),
        }
    }
}

/// The body of `GET /api/v1/leaves/..`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeavesCacheResponse {
    leaves: Vec<WireLeaf>,
    #[serde(default)]
    last_queried_block: u64,
}

/// Reads the leaves of a pool from the leaves cache of a relayer.
///
/// The relayer serves all leaves at once; they are fetched on first use
/// and then served in windows from that snapshot.
#[derive(Debug)]
pub struct RelayerLeavesSource {
    client: reqwest::Client,
    endpoint: Url,
    snapshot: Mutex<Option<(PoolId, Vec<Leaf>)>>,
}

impl RelayerLeavesSource {
    /// A source reading from the relayer at `endpoint`.
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            snapshot: Mutex::new(None),
        }
    }

    /// The url serving the leaves of `pool`.
    pub fn leaves_url(&self, pool: &PoolId) -> crate::Result<Url> {
        let path = format!(
            "/api/v1/leaves/{}/{}/{}",
            pool.chain_id.family(),
            pool.chain_id.underlying_chain_id(),
            pool.address
        );
        Ok(self.endpoint.join(&path)?)
    }

    async fn fetch_all(&self, pool: &PoolId) -> crate::Result<Vec<Leaf>> {
        let url = self.leaves_url(pool)?;
        let response: LeavesCacheResponse = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| crate::Error::SyncUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| crate::Error::SyncUnavailable(e.to_string()))?;
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::LeavesSync,
            relayer = %self.endpoint,
            pool = %pool,
            leaves = response.leaves.len(),
            last_queried_block = response.last_queried_block,
        );
        response
            .leaves
            .into_iter()
            .map(WireLeaf::into_leaf)
            .collect()
    }
}

#[async_trait::async_trait]
impl LeavesSource for RelayerLeavesSource {
    async fn get_leaves(
        &self,
        pool: &PoolId,
        from: u32,
        to: u32,
    ) -> crate::Result<Vec<Leaf>> {
        let cached = match &*self.snapshot.lock() {
            Some((p, leaves)) if p == pool => Some(leaves.clone()),
            _ => None,
        };
        let leaves = match cached {
            Some(leaves) => leaves,
            None => {
                let leaves = self.fetch_all(pool).await?;
                *self.snapshot.lock() = Some((pool.clone(), leaves.clone()));
                leaves
            }
        };
        let len = leaves.len();
        let from = (from as usize).min(len);
        let to = (to as usize).clamp(from, len);
        Ok(leaves[from..to].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypedChainId;

    #[test]
    fn leaves_url_of_a_pool() -> anyhow::Result<()> {
        let source = RelayerLeavesSource::new(
            reqwest::Client::new(),
            Url::parse("https://relayer.webb.tools")?,
        );
        let pool = PoolId::new(TypedChainId::Evm(5001), "0xABC");
        assert_eq!(
            source.leaves_url(&pool)?.as_str(),
            "https://relayer.webb.tools/api/v1/leaves/evm/5001/0xabc"
        );
        Ok(())
    }

    #[test]
    fn reads_both_leaf_encodings() -> anyhow::Result<()> {
        let body = format!(
            r#"{{"leaves":[{:?},"0x{}"],"lastQueriedBlock":42}}"#,
            vec![1u8; 32],
            hex::encode([2u8; 32])
        );
        let response: LeavesCacheResponse = serde_json::from_str(&body)?;
        assert_eq!(response.last_queried_block, 42);
        let leaves = response
            .leaves
            .into_iter()
            .map(WireLeaf::into_leaf)
            .collect::<crate::Result<Vec<_>>>()?;
        assert_eq!(leaves, vec![H256::repeat_byte(1), H256::repeat_byte(2)]);

        let short: LeavesCacheResponse =
            serde_json::from_str(r#"{"leaves":[[1,2,3]]}"#)?;
        let err = short
            .leaves
            .into_iter()
            .map(WireLeaf::into_leaf)
            .collect::<crate::Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, crate::Error::SyncUnavailable(_)));
        Ok(())
    }

    #[tokio::test]
    async fn serves_windows_of_the_snapshot() -> anyhow::Result<()> {
        let source = RelayerLeavesSource::new(
            reqwest::Client::new(),
            Url::parse("http://localhost:1")?,
        );
        let pool = PoolId::new(TypedChainId::Substrate(1080), "0");
        let leaves: Vec<_> = (0..5u64).map(H256::from_low_u64_be).collect();
        *source.snapshot.lock() = Some((pool.clone(), leaves.clone()));
        assert_eq!(source.get_leaves(&pool, 1, 3).await?, leaves[1..3]);
        assert_eq!(source.get_leaves(&pool, 3, 10).await?, leaves[3..]);
        assert!(source.get_leaves(&pool, 9, 12).await?.is_empty());
        Ok(())
    }
}
