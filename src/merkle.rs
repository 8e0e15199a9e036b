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
//! Poseidon hashing and the pool merkle tree.
//!
//! The tree mirrors the one kept on chain by the mixer and anchor pools: a
//! depth 30 sparse tree over BN254 with Poseidon (x5, width 3) as the node
//! hasher and a fixed zero leaf.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ark_bn254::Fr as Bn254Fr;
use ark_ff::{BigInteger, PrimeField};
use arkworks_native_gadgets::merkle_tree::SparseMerkleTree;
use arkworks_native_gadgets::poseidon::{FieldHasher, Poseidon};
use arkworks_setups::{common::setup_params, Curve};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::types::Leaf;

/// Depth of the pool merkle trees.
pub const TREE_DEPTH: usize = 30;

/// The value of an empty leaf in the pool merkle trees.
pub const ZERO_LEAF: [u8; 32] = [
    0x2f, 0xe5, 0x4c, 0x60, 0xd3, 0xac, 0xab, 0xf3, 0x34, 0x3a, 0x35, 0xb6,
    0xeb, 0xa1, 0x5d, 0xb4, 0x82, 0x1b, 0x34, 0x0f, 0x76, 0xe7, 0x41, 0xe2,
    0x24, 0x96, 0x85, 0xed, 0x48, 0x99, 0xaf, 0x6c,
];

type Smt = SparseMerkleTree<Bn254Fr, Poseidon<Bn254Fr>, TREE_DEPTH>;

/// Poseidon hasher over BN254 with the parameters used by the pools.
#[derive(Clone)]
pub struct PoseidonHasher {
    inner: Arc<Poseidon<Bn254Fr>>,
}

impl fmt::Debug for PoseidonHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoseidonHasher(bn254, x5, 3)")
    }
}

impl Default for PoseidonHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseidonHasher {
    /// Creates the hasher with the BN254 x5 width 3 parameters.
    pub fn new() -> Self {
        let params = setup_params::<Bn254Fr>(Curve::Bn254, 5, 3);
        Self {
            inner: Arc::new(Poseidon::<Bn254Fr>::new(params)),
        }
    }

    /// Hashes two 32 byte values.
    pub fn hash_two(&self, left: &H256, right: &H256) -> crate::Result<H256> {
        self.hash_two_f(&to_field(left), &to_field(right))
            .map(from_field)
    }

    fn hash_two_f(
        &self,
        left: &Bn254Fr,
        right: &Bn254Fr,
    ) -> crate::Result<Bn254Fr> {
        self.inner
            .hash_two(left, right)
            .map_err(|e| crate::Error::Hasher(e.to_string()))
    }

    fn poseidon(&self) -> &Poseidon<Bn254Fr> {
        &self.inner
    }
}

fn to_field(value: &H256) -> Bn254Fr {
    Bn254Fr::from_be_bytes_mod_order(value.as_bytes())
}

fn from_field(value: Bn254Fr) -> H256 {
    H256::from_slice(&value.into_repr().to_bytes_be())
}

/// The public merkle inputs of a withdraw proof.
///
/// Derived per attempt and never persisted, the tree may have grown since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProofInput {
    /// Index of the leaf being proven.
    pub leaf_index: u32,
    /// Sibling of the path node at each level, leaf level first.
    pub path_elements: Vec<H256>,
    /// `1` where the path node is the right child, `0` otherwise.
    pub path_indices: Vec<u8>,
    /// The root the path resolves to.
    pub root: H256,
}

impl MerkleProofInput {
    /// Recomputes the root from the leaf and the path.
    pub fn compute_root(
        &self,
        hasher: &PoseidonHasher,
        leaf: &Leaf,
    ) -> crate::Result<H256> {
        let mut current = *leaf;
        for (sibling, is_right) in
            self.path_elements.iter().zip(&self.path_indices)
        {
            current = if *is_right == 1 {
                hasher.hash_two(sibling, &current)?
            } else {
                hasher.hash_two(&current, sibling)?
            };
        }
        Ok(current)
    }
}

/// A pool merkle tree built from its ordered leaves.
pub struct MerkleTree {
    inner: Smt,
    len: usize,
}

impl MerkleTree {
    /// Builds the tree from leaves in insertion order.
    pub fn new(hasher: &PoseidonHasher, leaves: &[Leaf]) -> crate::Result<Self> {
        let pairs: BTreeMap<u32, Bn254Fr> = leaves
            .iter()
            .enumerate()
            .map(|(i, l)| (i as u32, to_field(l)))
            .collect();
        let inner = Smt::new(&pairs, hasher.poseidon(), &ZERO_LEAF)
            .map_err(|e| crate::Error::Hasher(e.to_string()))?;
        Ok(Self {
            inner,
            len: leaves.len(),
        })
    }

    /// Number of leaves in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current root.
    pub fn root(&self) -> H256 {
        from_field(self.inner.root())
    }

    /// The membership proof of the leaf at `leaf_index`.
    pub fn proof(&self, leaf_index: u32) -> crate::Result<MerkleProofInput> {
        if leaf_index as usize >= self.len {
            return Err(crate::Error::Generic(
                "leaf index is outside of the merkle tree",
            ));
        }
        let path = self.inner.generate_membership_proof(u64::from(leaf_index));
        let mut path_elements = Vec::with_capacity(TREE_DEPTH);
        let mut path_indices = Vec::with_capacity(TREE_DEPTH);
        for (level, (left, right)) in path.path.iter().enumerate() {
            let is_right = (leaf_index >> level) & 1;
            let sibling = if is_right == 1 { left } else { right };
            path_elements.push(from_field(*sibling));
            path_indices.push(is_right as u8);
        }
        Ok(MerkleProofInput {
            leaf_index,
            path_elements,
            path_indices,
            root: self.root(),
        })
    }
}

/// Roots of an empty subtree at each level, `TREE_DEPTH + 1` entries.
fn zero_hashes(hasher: &PoseidonHasher) -> crate::Result<Vec<Bn254Fr>> {
    let empty = Smt::new(&BTreeMap::new(), hasher.poseidon(), &ZERO_LEAF)
        .map_err(|e| crate::Error::Hasher(e.to_string()))?;
    let path = empty.generate_membership_proof(0);
    let mut zeros: Vec<_> = path.path.iter().map(|(left, _)| *left).collect();
    zeros.push(empty.root());
    Ok(zeros)
}

/// The root of the tree after each insertion: entry `k` is the root of the
/// tree holding `leaves[..=k]`.
///
/// Pools keep a history of past roots, so these are the roots a proof may be
/// checked against.
pub fn prefix_roots(
    hasher: &PoseidonHasher,
    leaves: &[Leaf],
) -> crate::Result<Vec<H256>> {
    let zeros = zero_hashes(hasher)?;
    let mut filled: Vec<Bn254Fr> = zeros[..TREE_DEPTH].to_vec();
    let mut roots = Vec::with_capacity(leaves.len());
    for (i, leaf) in leaves.iter().enumerate() {
        let mut index = i;
        let mut current = to_field(leaf);
        for level in 0..TREE_DEPTH {
            let (left, right) = if index % 2 == 0 {
                filled[level] = current;
                (current, zeros[level])
            } else {
                (filled[level], current)
            };
            current = hasher.hash_two_f(&left, &right)?;
            index /= 2;
        }
        roots.push(from_field(current));
    }
    Ok(roots)
}
