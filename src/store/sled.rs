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
use std::path::Path;

use super::LeafCacheStore;
use crate::types::{Leaf, PoolId};

/// SledLeafCache is a store that stores the leaves in a sled database.
#[derive(Clone)]
pub struct SledLeafCache {
    db: sled::Db,
}

impl std::fmt::Debug for SledLeafCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLeafCache").finish()
    }
}

impl SledLeafCache {
    /// Opens (or creates) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .use_compression(true)
            .compression_factor(18)
            .open()?;
        Ok(Self { db })
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn leaves_tree(&self, pool: &PoolId) -> crate::Result<sled::Tree> {
        let mut name = b"leaves/".to_vec();
        name.extend_from_slice(&pool.to_bytes());
        Ok(self.db.open_tree(name)?)
    }
}

impl LeafCacheStore for SledLeafCache {
    #[tracing::instrument(skip(self))]
    fn get_leaves(&self, pool: &PoolId) -> crate::Result<Vec<Leaf>> {
        let tree = self.leaves_tree(pool)?;
        // keys are big endian indices, so iteration follows the tree order.
        tree.iter()
            .values()
            .map(|v| {
                let v = v?;
                if v.len() != Leaf::len_bytes() {
                    return Err(crate::Error::Generic(
                        "corrupted leaf in the leaves cache",
                    ));
                }
                Ok(Leaf::from_slice(&v))
            })
            .collect()
    }

    fn leaves_count(&self, pool: &PoolId) -> crate::Result<u32> {
        Ok(self.leaves_tree(pool)?.len() as u32)
    }

    #[tracing::instrument(skip(self, leaves), fields(count = leaves.len()))]
    fn insert_leaves(
        &self,
        pool: &PoolId,
        leaves: &[(u32, Leaf)],
    ) -> crate::Result<()> {
        let tree = self.leaves_tree(pool)?;
        let mut batch = sled::Batch::default();
        for (index, leaf) in leaves {
            batch.insert(index.to_be_bytes().to_vec(), leaf.as_bytes());
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn clear_leaves(&self, pool: &PoolId) -> crate::Result<()> {
        self.leaves_tree(pool)?.clear()?;
        Ok(())
    }
}
