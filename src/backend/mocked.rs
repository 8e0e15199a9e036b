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

use ethereum_types::{H256, U256};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::{
    ChainDataSource, LeavesSource, TransactionSubmitter, TxNotification,
    TxNotifier, WithdrawCall, WithdrawalBackend,
};
use crate::merkle::{MerkleTree, PoseidonHasher};
use crate::types::{ChainFamily, Leaf, PoolId, SignerIdentity, TxReference};

/// What the mocked chain does with submitted transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The transaction is finalized.
    Finalize,
    /// The user declines to sign.
    Reject,
    /// The chain rejects the transaction with the given reason.
    Fail(String),
}

#[derive(Debug)]
struct MockState {
    leaves: HashMap<PoolId, Vec<Leaf>>,
    latest_roots: HashMap<PoolId, H256>,
    neighbor_roots: HashMap<PoolId, Vec<H256>>,
    denominations: HashMap<PoolId, U256>,
    offline: bool,
    outcome: SubmitOutcome,
}

/// A chain that lives in memory.
///
/// Unless overridden, the latest root of a pool is the root of its current
/// leaves and it has no neighbor roots.
///
/// A gated chain holds every submitted transaction until its gate is
/// notified, which keeps a withdrawal in transaction sending.
#[derive(Debug)]
pub struct MockedChain {
    family: ChainFamily,
    hasher: PoseidonHasher,
    state: RwLock<MockState>,
    submitted: Mutex<Vec<WithdrawCall>>,
    leaves_requests: Mutex<Vec<(u32, u32)>>,
    submit_gate: Mutex<Option<Arc<Notify>>>,
    submit_entered: Arc<Notify>,
}

impl MockedChain {
    /// Creates an empty chain of the given family.
    pub fn new(family: ChainFamily) -> Self {
        Self {
            family,
            hasher: PoseidonHasher::new(),
            state: RwLock::new(MockState {
                leaves: HashMap::new(),
                latest_roots: HashMap::new(),
                neighbor_roots: HashMap::new(),
                denominations: HashMap::new(),
                offline: false,
                outcome: SubmitOutcome::Finalize,
            }),
            submitted: Mutex::new(Vec::new()),
            leaves_requests: Mutex::new(Vec::new()),
            submit_gate: Mutex::new(None),
            submit_entered: Arc::new(Notify::new()),
        }
    }

    /// Inserts a leaf in the pool, returning its index.
    pub fn deposit(&self, pool: &PoolId, leaf: Leaf) -> u32 {
        let mut state = self.state.write();
        let leaves = state.leaves.entry(pool.clone()).or_default();
        leaves.push(leaf);
        (leaves.len() - 1) as u32
    }

    /// Overrides the latest root of the pool.
    pub fn set_latest_root(&self, pool: &PoolId, root: H256) {
        self.state.write().latest_roots.insert(pool.clone(), root);
    }

    /// Sets the neighbor roots of the pool.
    pub fn set_neighbor_roots(&self, pool: &PoolId, roots: Vec<H256>) {
        self.state.write().neighbor_roots.insert(pool.clone(), roots);
    }

    /// Sets the deposit size of the pool.
    pub fn set_denomination(&self, pool: &PoolId, denomination: U256) {
        self.state
            .write()
            .denominations
            .insert(pool.clone(), denomination);
    }

    /// Makes every read fail as if the node was unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
    }

    /// Decides what happens to the next submitted transactions.
    pub fn set_submit_outcome(&self, outcome: SubmitOutcome) {
        self.state.write().outcome = outcome;
    }

    /// Holds submitted transactions until `gate` is notified.
    pub fn set_submit_gate(&self, gate: Arc<Notify>) {
        *self.submit_gate.lock() = Some(gate);
    }

    /// Notified every time a transaction is submitted.
    pub fn submit_entered(&self) -> Arc<Notify> {
        self.submit_entered.clone()
    }

    /// Every call submitted so far.
    pub fn submitted(&self) -> Vec<WithdrawCall> {
        self.submitted.lock().clone()
    }

    /// Every `(from, to)` window requested so far.
    pub fn leaves_requests(&self) -> Vec<(u32, u32)> {
        self.leaves_requests.lock().clone()
    }

    /// The root of the pool's current leaves.
    pub fn tree_root(&self, pool: &PoolId) -> crate::Result<H256> {
        let leaves = self.state.read().leaves.get(pool).cloned();
        let tree = MerkleTree::new(&self.hasher, &leaves.unwrap_or_default())?;
        Ok(tree.root())
    }

    fn ensure_online(&self) -> crate::Result<()> {
        if self.state.read().offline {
            return Err(crate::Error::SyncUnavailable(
                "connection to the node was refused".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeavesSource for MockedChain {
    async fn get_leaves(
        &self,
        pool: &PoolId,
        from: u32,
        to: u32,
    ) -> crate::Result<Vec<Leaf>> {
        self.leaves_requests.lock().push((from, to));
        self.ensure_online()?;
        let state = self.state.read();
        let leaves = state.leaves.get(pool).map(Vec::as_slice).unwrap_or(&[]);
        let from = (from as usize).min(leaves.len());
        let to = (to as usize).clamp(from, leaves.len());
        Ok(leaves[from..to].to_vec())
    }
}

#[async_trait::async_trait]
impl ChainDataSource for MockedChain {
    async fn get_latest_root(&self, pool: &PoolId) -> crate::Result<H256> {
        self.ensure_online()?;
        let root = self.state.read().latest_roots.get(pool).copied();
        match root {
            Some(root) => Ok(root),
            None => self.tree_root(pool),
        }
    }

    async fn get_neighbor_roots(
        &self,
        pool: &PoolId,
    ) -> crate::Result<Vec<H256>> {
        self.ensure_online()?;
        let state = self.state.read();
        Ok(state.neighbor_roots.get(pool).cloned().unwrap_or_default())
    }

    async fn denomination(&self, pool: &PoolId) -> crate::Result<U256> {
        self.ensure_online()?;
        self.state
            .read()
            .denominations
            .get(pool)
            .copied()
            .ok_or(crate::Error::Generic("pool has no denomination"))
    }
}

#[async_trait::async_trait]
impl TransactionSubmitter for MockedChain {
    async fn submit(
        &self,
        call: &WithdrawCall,
        _signer: &SignerIdentity,
        notifier: &TxNotifier,
    ) -> crate::Result<TxReference> {
        notifier.notify(TxNotification::BeforeSend {
            method: call.method.clone(),
        });
        self.submit_entered.notify_one();
        let gate = self.submit_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let outcome = self.state.read().outcome.clone();
        match outcome {
            SubmitOutcome::Finalize => {
                let mut submitted = self.submitted.lock();
                submitted.push(call.clone());
                let tx = TxReference(format!(
                    "{:?}",
                    H256::from_low_u64_be(submitted.len() as u64)
                ));
                notifier.notify(TxNotification::Finalize {
                    method: call.method.clone(),
                    tx: tx.clone(),
                });
                Ok(tx)
            }
            SubmitOutcome::Reject => {
                let reason = String::from("user rejected the request");
                notifier.notify(TxNotification::Failed {
                    method: call.method.clone(),
                    reason: reason.clone(),
                });
                Err(crate::Error::SubmissionRejected(reason))
            }
            SubmitOutcome::Fail(reason) => {
                notifier.notify(TxNotification::Failed {
                    method: call.method.clone(),
                    reason: reason.clone(),
                });
                Err(crate::Error::SubmissionFailed(reason))
            }
        }
    }
}

impl WithdrawalBackend for MockedChain {
    fn family(&self) -> ChainFamily {
        self.family
    }
}
