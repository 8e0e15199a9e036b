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
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::LeafCacheStore;
use crate::types::{Leaf, PoolId};

type MemStore = HashMap<PoolId, BTreeMap<u32, Leaf>>;

/// InMemoryLeafCache is a store that stores the leaves in memory.
#[derive(Clone, Default)]
pub struct InMemoryLeafCache {
    store: Arc<RwLock<MemStore>>,
}

impl std::fmt::Debug for InMemoryLeafCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLeafCache").finish()
    }
}

impl LeafCacheStore for InMemoryLeafCache {
    #[tracing::instrument(skip(self))]
    fn get_leaves(&self, pool: &PoolId) -> crate::Result<Vec<Leaf>> {
        let guard = self.store.read();
        let val = guard
            .get(pool)
            .map(|leaves| leaves.values().copied().collect())
            .unwrap_or_default();
        Ok(val)
    }

    fn leaves_count(&self, pool: &PoolId) -> crate::Result<u32> {
        let guard = self.store.read();
        Ok(guard.get(pool).map(|l| l.len() as u32).unwrap_or_default())
    }

    #[tracing::instrument(skip(self, leaves), fields(count = leaves.len()))]
    fn insert_leaves(
        &self,
        pool: &PoolId,
        leaves: &[(u32, Leaf)],
    ) -> crate::Result<()> {
        let mut guard = self.store.write();
        guard
            .entry(pool.clone())
            .or_default()
            .extend(leaves.iter().copied());
        Ok(())
    }

    fn clear_leaves(&self, pool: &PoolId) -> crate::Result<()> {
        self.store.write().remove(pool);
        Ok(())
    }
}
