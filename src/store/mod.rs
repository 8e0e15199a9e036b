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
use crate::types::{Leaf, PoolId};

/// In memory leaves cache.
pub mod mem;
/// Sled backed leaves cache.
pub mod sled;

pub use self::mem::InMemoryLeafCache;
pub use self::sled::SledLeafCache;

/// A Leaf Cache Store is a simple trait that would help in
/// getting the leaves and insert them with a simple API.
///
/// Pool leaves are append only, so a cache only ever grows. Implementations
/// are shared across withdraw sessions.
pub trait LeafCacheStore: Send + Sync {
    /// All cached leaves of the pool, in insertion order.
    fn get_leaves(&self, pool: &PoolId) -> crate::Result<Vec<Leaf>>;

    /// Number of cached leaves of the pool.
    fn leaves_count(&self, pool: &PoolId) -> crate::Result<u32>;

    /// Caches leaves at their tree index.
    fn insert_leaves(
        &self,
        pool: &PoolId,
        leaves: &[(u32, Leaf)],
    ) -> crate::Result<()>;

    /// Forgets every cached leaf of the pool.
    fn clear_leaves(&self, pool: &PoolId) -> crate::Result<()>;
}
