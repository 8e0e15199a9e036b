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
//! Chain backends.
//!
//! The withdraw flow is written once against [`WithdrawalBackend`]; every
//! chain family (EVM, Substrate) provides its own implementation, which
//! fetches leaves and roots and submits the withdraw transaction.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{
    ChainFamily, Leaf, PoolId, SignerIdentity, TxReference, TypedChainId,
};

/// Encoding of accounts into the proof system's native form.
pub mod account;
/// EVM chains, read and written through ethers.
pub mod evm;
/// Substrate nodes, read over json-rpc.
pub mod substrate;
/// An in memory chain, used to exercise the withdraw flow.
pub mod mocked;

/// A source of pool leaves.
#[async_trait::async_trait]
pub trait LeavesSource: Send + Sync {
    /// Returns the leaves with index in `from..to`.
    ///
    /// Returning fewer than `to - from` leaves signals the end of the data.
    async fn get_leaves(
        &self,
        pool: &PoolId,
        from: u32,
        to: u32,
    ) -> crate::Result<Vec<Leaf>>;
}

/// Read access to the pool state of a chain.
#[async_trait::async_trait]
pub trait ChainDataSource: LeavesSource {
    /// The latest root accepted by the pool.
    async fn get_latest_root(&self, pool: &PoolId) -> crate::Result<H256>;

    /// The recent roots of linked pools that the pool still accepts.
    async fn get_neighbor_roots(
        &self,
        pool: &PoolId,
    ) -> crate::Result<Vec<H256>>;

    /// The fixed deposit size of the pool, in the asset's smallest unit.
    async fn denomination(&self, pool: &PoolId) -> crate::Result<U256>;
}

/// The call a withdraw transaction makes, like `mixerBn254.withdraw`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodPath {
    /// The pallet or contract section.
    pub section: String,
    /// The method name.
    pub method: String,
}

impl MethodPath {
    /// The withdraw call of the pools of a chain family.
    pub fn withdraw(family: ChainFamily) -> Self {
        let section = match family {
            ChainFamily::Evm => "anchor",
            ChainFamily::Substrate => "mixerBn254",
        };
        Self {
            section: section.into(),
            method: "withdraw".into(),
        }
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.method)
    }
}

/// A withdraw transaction, ready to be signed and submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawCall {
    /// The pool to withdraw from.
    pub pool: PoolId,
    /// The called method.
    pub method: MethodPath,
    /// The zero-knowledge proof.
    pub proof: Vec<u8>,
    /// The root the proof was made against.
    pub root: H256,
    /// The nullifier hash of the note.
    pub nullifier_hash: H256,
    /// The account receiving the funds.
    pub recipient: String,
    /// The account receiving the fee.
    pub relayer: String,
    /// The fee paid to `relayer`.
    pub fee: U256,
    /// The refund sent to `recipient`.
    pub refund: U256,
}

/// Transaction progress reported by a submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxNotification {
    /// The transaction is about to be signed and sent.
    BeforeSend {
        /// The called method.
        method: MethodPath,
    },
    /// The transaction is finalized.
    Finalize {
        /// The called method.
        method: MethodPath,
        /// The transaction reference.
        tx: TxReference,
    },
    /// The transaction failed or was rejected.
    Failed {
        /// The called method.
        method: MethodPath,
        /// Why it failed.
        reason: String,
    },
}

/// Callback used by submitters to report transaction progress.
#[derive(Clone)]
pub struct TxNotifier(Arc<dyn Fn(TxNotification) + Send + Sync>);

impl TxNotifier {
    /// Creates a notifier from a callback.
    pub fn new(f: impl Fn(TxNotification) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A notifier that drops every notification.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Reports a notification.
    pub fn notify(&self, notification: TxNotification) {
        (self.0)(notification)
    }
}

impl fmt::Debug for TxNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxNotifier").finish()
    }
}

/// Signs and submits transactions on behalf of the caller's own account.
#[async_trait::async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submits the call and waits for it to be finalized.
    ///
    /// A declined signature must be reported as
    /// [`crate::Error::SubmissionRejected`], a rejection by the chain as
    /// [`crate::Error::SubmissionFailed`].
    async fn submit(
        &self,
        call: &WithdrawCall,
        signer: &SignerIdentity,
        notifier: &TxNotifier,
    ) -> crate::Result<TxReference>;
}

/// Everything the withdraw flow needs from one chain.
pub trait WithdrawalBackend: ChainDataSource + TransactionSubmitter {
    /// The family of the chain.
    fn family(&self) -> ChainFamily;
}

/// The backends of every chain we can withdraw on.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<TypedChainId, Arc<dyn WithdrawalBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.backends.keys()).finish()
    }
}

impl BackendRegistry {
    /// Registers the backend of a chain, replacing any previous one.
    pub fn register(
        &mut self,
        chain_id: TypedChainId,
        backend: Arc<dyn WithdrawalBackend>,
    ) -> crate::Result<()> {
        if backend.family() != chain_id.family() {
            return Err(crate::Error::Generic(
                "backend family does not match the chain family",
            ));
        }
        self.backends.insert(chain_id, backend);
        Ok(())
    }

    /// The chains configured in the `evm` and `substrate` sections.
    ///
    /// Substrate nodes are read only, see [`substrate::SubstrateNode`].
    pub fn from_config(
        config: &crate::config::WithdrawConfig,
        http: reqwest::Client,
    ) -> crate::Result<Self> {
        let mut registry = Self::default();
        for (name, chain) in &config.evm {
            tracing::debug!("Using evm chain {} ({})", name, chain.chain_id);
            let backend = evm::EvmChain::new(chain, &config.pools)?;
            registry
                .register(TypedChainId::Evm(chain.chain_id), Arc::new(backend))?;
        }
        for (name, node) in &config.substrate {
            tracing::debug!("Using substrate node {} ({})", name, node.chain_id);
            let backend =
                substrate::SubstrateNode::new(http.clone(), node, &config.pools)?;
            registry.register(
                TypedChainId::Substrate(node.chain_id),
                Arc::new(backend),
            )?;
        }
        Ok(registry)
    }

    /// The backend of a chain.
    pub fn get(
        &self,
        chain_id: TypedChainId,
    ) -> crate::Result<Arc<dyn WithdrawalBackend>> {
        self.backends
            .get(&chain_id)
            .cloned()
            .ok_or(crate::Error::ChainNotFound { chain_id })
    }
}
