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
use std::sync::Arc;

use crate::backend::LeavesSource;
use crate::store::LeafCacheStore;
use crate::types::{Leaf, PoolId};

/// Default number of leaves requested per window.
pub const DEFAULT_PAGE_SIZE: u32 = 512;

/// Fetches the leaves of a pool, window by window.
///
/// Leaves already in the cache are not fetched again: paging starts at the
/// cached length and only the new leaves are requested. The cache is only
/// written once the whole fetch succeeded.
#[derive(Clone)]
pub struct LeafSynchronizer {
    cache: Arc<dyn LeafCacheStore>,
    page_size: u32,
}

impl std::fmt::Debug for LeafSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafSynchronizer")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl LeafSynchronizer {
    /// Creates a synchronizer with the given cache and window size.
    ///
    /// A window size of zero is treated as one.
    pub fn new(cache: Arc<dyn LeafCacheStore>, page_size: u32) -> Self {
        Self {
            cache,
            page_size: page_size.max(1),
        }
    }

    /// The cache shared by this synchronizer.
    pub fn cache(&self) -> &Arc<dyn LeafCacheStore> {
        &self.cache
    }

    /// All leaves of the pool, in insertion order.
    ///
    /// Fails with [`crate::Error::SyncUnavailable`] when the source fails,
    /// in which case nothing fetched so far is kept.
    #[tracing::instrument(skip(self, source), fields(pool = %pool))]
    pub async fn fetch_leaves<S>(
        &self,
        source: &S,
        pool: &PoolId,
    ) -> crate::Result<Vec<Leaf>>
    where
        S: LeavesSource + ?Sized,
    {
        let mut leaves = self.cache.get_leaves(pool)?;
        let start = leaves.len() as u32;
        let fetched = self.fetch_from(source, pool, start).await?;
        if !fetched.is_empty() {
            let indexed: Vec<(u32, Leaf)> = fetched
                .iter()
                .enumerate()
                .map(|(i, leaf)| (start + i as u32, *leaf))
                .collect();
            self.cache.insert_leaves(pool, &indexed)?;
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::DEBUG,
                kind = %crate::probe::Kind::LeavesStore,
                pool = %pool,
                cached = start,
                inserted = fetched.len(),
            );
        }
        leaves.extend(fetched);
        Ok(leaves)
    }

    /// All leaves of the pool as served by a source we do not trust, like a
    /// relayer's leaves cache.
    ///
    /// The leaves are fetched from index zero and never written to the
    /// cache, so the chain stays the only writer of cached leaves.
    #[tracing::instrument(skip(self, source), fields(pool = %pool))]
    pub async fn fetch_uncached<S>(
        &self,
        source: &S,
        pool: &PoolId,
    ) -> crate::Result<Vec<Leaf>>
    where
        S: LeavesSource + ?Sized,
    {
        self.fetch_from(source, pool, 0).await
    }

    async fn fetch_from<S>(
        &self,
        source: &S,
        pool: &PoolId,
        start: u32,
    ) -> crate::Result<Vec<Leaf>>
    where
        S: LeavesSource + ?Sized,
    {
        let mut fetched = Vec::new();
        let mut from = start;
        loop {
            let to = from.saturating_add(self.page_size);
            let page =
                source.get_leaves(pool, from, to).await.map_err(|e| {
                    tracing::warn!("leaves sync of {} failed: {}", pool, e);
                    match e {
                        crate::Error::SyncUnavailable(_) => e,
                        e => crate::Error::SyncUnavailable(e.to_string()),
                    }
                })?;
            let requested = (to - from) as usize;
            if page.len() > requested {
                return Err(crate::Error::SyncUnavailable(format!(
                    "asked for {} leaves of {} but got {}",
                    requested,
                    pool,
                    page.len()
                )));
            }
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::TRACE,
                kind = %crate::probe::Kind::LeavesSync,
                pool = %pool,
                from = from,
                to = to,
                received = page.len(),
            );
            let done = page.len() < requested;
            fetched.extend(page);
            if done || to == u32::MAX {
                break;
            }
            from = to;
        }
        Ok(fetched)
    }
}

/// The index of `target` in the pool leaves.
///
/// A missing leaf usually means the note belongs to another pool.
pub fn locate_leaf_index(leaves: &[Leaf], target: &Leaf) -> crate::Result<u32> {
    leaves
        .iter()
        .position(|leaf| leaf == target)
        .map(|i| i as u32)
        .ok_or(crate::Error::LeafNotFound {
            commitment: *target,
        })
}
