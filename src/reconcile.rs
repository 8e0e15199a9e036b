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
//! Binds a cross-chain withdrawal to a root the destination pool accepts.
//!
//! The destination pool only knows the source tree through the roots the
//! bridge relayed to it, which may lag behind the source chain. The proof
//! must therefore be made against the source tree as it was when one of
//! those roots was computed.
use std::sync::Arc;
use std::time::Duration;

use ethereum_types::H256;

use crate::backend::ChainDataSource;
use crate::merkle::{prefix_roots, MerkleProofInput, MerkleTree, PoseidonHasher};
use crate::retry::ConstantWithMaxRetryCount;
use crate::types::{Leaf, PoolId};

/// Default number of fresh root fetches after a stale one.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default wait between root fetches.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Finds the destination root a source leaf can be proven against.
#[derive(Debug, Clone)]
pub struct RootReconciler {
    hasher: PoseidonHasher,
    max_retries: usize,
    interval: Duration,
}

impl RootReconciler {
    /// A reconciler refetching stale roots up to `max_retries` times,
    /// `interval` apart.
    pub fn new(
        hasher: PoseidonHasher,
        max_retries: usize,
        interval: Duration,
    ) -> Self {
        Self {
            hasher,
            max_retries,
            interval,
        }
    }

    /// Matches the source leaves against the destination roots, once.
    ///
    /// `latest` is checked first, then `neighbors` in order. Only trees that
    /// contain the leaf are considered. Fails with
    /// [`crate::Error::StaleRoot`] when no root matches.
    pub fn reconcile_once(
        &self,
        dest_pool: &PoolId,
        latest: H256,
        neighbors: &[H256],
        leaves: &[Leaf],
        leaf_index: u32,
    ) -> crate::Result<MerkleProofInput> {
        let candidates: Vec<H256> =
            std::iter::once(latest).chain(neighbors.iter().copied()).collect();
        let first = leaf_index as usize;
        if first >= leaves.len() {
            return Err(crate::Error::Generic(
                "leaf index is outside of the source leaves",
            ));
        }
        let roots = prefix_roots(&self.hasher, leaves)?;
        for candidate in &candidates {
            let matched = roots
                .iter()
                .enumerate()
                .skip(first)
                .rev()
                .find(|(_, root)| *root == candidate);
            if let Some((last, _)) = matched {
                let tree = MerkleTree::new(&self.hasher, &leaves[..=last])?;
                let proof = tree.proof(leaf_index)?;
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %crate::probe::Kind::RootReconcile,
                    pool = %dest_pool,
                    root = ?proof.root,
                    leaves = last + 1,
                    latest = *candidate == latest,
                );
                return Ok(proof);
            }
        }
        Err(crate::Error::StaleRoot {
            pool: dest_pool.clone(),
            candidates: candidates.len(),
        })
    }

    /// Fetches the destination roots and matches them against the source
    /// leaves, fetching fresh roots again while they are stale.
    #[tracing::instrument(skip(self, dest, leaves), fields(pool = %dest_pool))]
    pub async fn reconcile<D>(
        &self,
        dest: &D,
        dest_pool: &PoolId,
        leaves: &[Leaf],
        leaf_index: u32,
    ) -> crate::Result<MerkleProofInput>
    where
        D: ChainDataSource + ?Sized,
    {
        let backoff =
            ConstantWithMaxRetryCount::new(self.interval, self.max_retries);
        let leaves: Arc<[Leaf]> = leaves.into();
        let task = move || {
            let leaves = leaves.clone();
            async move {
                let latest = dest
                    .get_latest_root(dest_pool)
                    .await
                    .map_err(backoff::Error::permanent)?;
                let neighbors = dest
                    .get_neighbor_roots(dest_pool)
                    .await
                    .map_err(backoff::Error::permanent)?;
                let reconciler = self.clone();
                let pool = dest_pool.clone();
                let matched = tokio::task::spawn_blocking(move || {
                    reconciler.reconcile_once(
                        &pool, latest, &neighbors, &leaves, leaf_index,
                    )
                })
                .await
                .map_err(|e| {
                    backoff::Error::permanent(crate::Error::Hasher(format!(
                        "root reconcile task join failed: {e}"
                    )))
                })?;
                matched.map_err(|e| match e {
                    crate::Error::StaleRoot { .. } => {
                        tracing::event!(
                            target: crate::probe::TARGET,
                            tracing::Level::DEBUG,
                            kind = %crate::probe::Kind::Retry,
                            pool = %dest_pool,
                            reason = "stale root",
                        );
                        backoff::Error::transient(e)
                    }
                    e => backoff::Error::permanent(e),
                })
            }
        };
        backoff::future::retry(backoff, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mocked::MockedChain;
    use crate::types::{ChainFamily, TypedChainId};

    fn leaves(n: u64) -> Vec<Leaf> {
        (1..=n).map(H256::from_low_u64_be).collect()
    }

    fn reconciler() -> RootReconciler {
        RootReconciler::new(
            PoseidonHasher::new(),
            2,
            Duration::from_millis(10),
        )
    }

    fn dest() -> PoolId {
        PoolId::new(TypedChainId::Substrate(1081), "0")
    }

    #[test]
    fn proves_against_a_lagging_neighbor_root() -> anyhow::Result<()> {
        let hasher = PoseidonHasher::new();
        let leaves = leaves(5);
        let lagging = MerkleTree::new(&hasher, &leaves[..3])?.root();
        let proof = reconciler().reconcile_once(
            &dest(),
            H256::repeat_byte(0xff),
            &[H256::repeat_byte(0xee), lagging],
            &leaves,
            1,
        )?;
        assert_eq!(proof.root, lagging);
        assert_eq!(proof.compute_root(&hasher, &leaves[1])?, lagging);
        Ok(())
    }

    #[test]
    fn roots_before_the_deposit_do_not_count() -> anyhow::Result<()> {
        let hasher = PoseidonHasher::new();
        let leaves = leaves(4);
        let before = MerkleTree::new(&hasher, &leaves[..2])?.root();
        let err = reconciler()
            .reconcile_once(&dest(), before, &[], &leaves, 3)
            .unwrap_err();
        assert!(matches!(err, crate::Error::StaleRoot { candidates: 1, .. }));
        assert!(err.is_retryable());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stale_roots_are_refetched_then_reported() -> anyhow::Result<()> {
        let hasher = PoseidonHasher::new();
        let chain = MockedChain::new(ChainFamily::Substrate);
        let leaves = leaves(3);
        chain.set_latest_root(&dest(), H256::repeat_byte(1));
        chain.set_neighbor_roots(&dest(), vec![H256::repeat_byte(2)]);
        let err = reconciler()
            .reconcile(&chain, &dest(), &leaves, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::StaleRoot { candidates: 2, .. }));

        let root = MerkleTree::new(&hasher, &leaves)?.root();
        chain.set_latest_root(&dest(), root);
        let proof = reconciler().reconcile(&chain, &dest(), &leaves, 0).await?;
        assert_eq!(proof.root, root);
        Ok(())
    }
}
