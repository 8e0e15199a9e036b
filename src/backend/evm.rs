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
use std::time::Duration;

use ethereum_types::{H160, H256, U256};
use ethers::contract::ContractError;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Bytes;
use parking_lot::Mutex;

use super::account::native_account_bytes;
use super::{
    ChainDataSource, LeavesSource, TransactionSubmitter, TxNotification,
    TxNotifier, WithdrawCall, WithdrawalBackend,
};
use crate::config::{EvmChainConfig, PoolConfig};
use crate::types::{
    ChainFamily, Leaf, PoolId, SignerIdentity, TxReference, TypedChainId,
};

mod contract {
    #![allow(missing_docs)]
    ethers::contract::abigen!(
        MixerContract,
        r#"[
            function denomination() external view returns (uint256)
            function getLastRoot() external view returns (bytes32)
            function getLatestNeighborRoots() external view returns (bytes32[])
            function withdraw(bytes proof, bytes32 root, bytes32 nullifierHash, address recipient, address relayer, uint256 fee, uint256 refund) external payable
            event Deposit(bytes32 indexed commitment, uint32 leafIndex, uint256 timestamp)
        ]"#
    );
}

use contract::MixerContract;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Deposits read so far from the logs of one pool.
#[derive(Debug, Default)]
struct DepositLog {
    leaves: Vec<Leaf>,
    next_block: u64,
}

/// An EVM chain, read and written through its json-rpc endpoint.
///
/// Leaves are rebuilt from the `Deposit` events of the pool contract. The
/// events are queried once and only newer blocks are queried afterwards.
#[derive(Debug)]
pub struct EvmChain {
    chain_id: TypedChainId,
    provider: Provider<Http>,
    wallet: Option<LocalWallet>,
    deployed_at: HashMap<PoolId, u64>,
    tx_poll_interval: Duration,
    deposits: Mutex<HashMap<PoolId, DepositLog>>,
}

impl EvmChain {
    /// Connects to the chain described by `config`, serving the `pools` of
    /// that chain.
    pub fn new(
        config: &EvmChainConfig,
        pools: &[PoolConfig],
    ) -> crate::Result<Self> {
        let chain_id = TypedChainId::Evm(config.chain_id);
        let provider =
            Provider::<Http>::try_from(config.http_endpoint.as_str())?
                .interval(config.tx_poll_interval());
        let wallet = match &config.private_key {
            Some(key) => Some(
                LocalWallet::from_bytes(key.as_bytes())
                    .map_err(|_| {
                        crate::Error::Generic("invalid evm private key")
                    })?
                    .with_chain_id(u64::from(config.chain_id)),
            ),
            None => None,
        };
        let deployed_at = pools
            .iter()
            .filter(|p| p.chain == chain_id)
            .map(|p| (p.pool_id(), p.deployed_at))
            .collect();
        Ok(Self {
            chain_id,
            provider,
            wallet,
            deployed_at,
            tx_poll_interval: config.tx_poll_interval(),
            deposits: Mutex::new(HashMap::new()),
        })
    }

    /// The account of the configured key, if any.
    pub fn signer(&self) -> Option<SignerIdentity> {
        self.wallet
            .as_ref()
            .map(|wallet| SignerIdentity(format!("{:?}", wallet.address())))
    }

    fn contract<M: Middleware>(
        &self,
        pool: &PoolId,
        client: Arc<M>,
    ) -> crate::Result<MixerContract<M>> {
        if pool.chain_id != self.chain_id {
            return Err(crate::Error::ChainNotFound {
                chain_id: pool.chain_id,
            });
        }
        Ok(MixerContract::new(evm_address(&pool.address)?, client))
    }

    fn reader(
        &self,
        pool: &PoolId,
    ) -> crate::Result<MixerContract<Provider<Http>>> {
        self.contract(pool, Arc::new(self.provider.clone()))
    }

    /// Reads the deposits of `pool` made since the last read.
    async fn refresh_deposits(&self, pool: &PoolId) -> crate::Result<()> {
        let next_block = self.deposits.lock().get(pool).map(|log| log.next_block);
        let from_block = next_block.unwrap_or_else(|| {
            self.deployed_at.get(pool).copied().unwrap_or_default()
        });
        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(read_error)?
            .as_u64();
        if from_block > latest {
            return Ok(());
        }
        let events = self
            .reader(pool)?
            .deposit_filter()
            .from_block(from_block)
            .to_block(latest)
            .query()
            .await
            .map_err(read_error)?;
        let mut deposits = self.deposits.lock();
        let log = deposits.entry(pool.clone()).or_default();
        for event in events {
            let index = event.leaf_index as usize;
            if index < log.leaves.len() {
                continue;
            }
            if index > log.leaves.len() {
                return Err(crate::Error::SyncUnavailable(format!(
                    "deposit {} of {} came before deposit {}",
                    index,
                    pool,
                    log.leaves.len()
                )));
            }
            log.leaves.push(H256::from(event.commitment));
        }
        log.next_block = latest + 1;
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::TRACE,
            kind = %crate::probe::Kind::LeavesSync,
            pool = %pool,
            from_block = from_block,
            to_block = latest,
            leaves = log.leaves.len(),
        );
        Ok(())
    }
}

/// A 20 byte EVM address, from its `0x` hex form.
fn evm_address(account: &str) -> crate::Result<H160> {
    native_account_bytes(ChainFamily::Evm, account).map(H160::from)
}

fn read_error(e: impl std::fmt::Display) -> crate::Error {
    crate::Error::SyncUnavailable(e.to_string())
}

/// A declined signature is a rejection, anything else a failure.
fn submission_error(e: ContractError<SignerClient>) -> crate::Error {
    match e {
        ContractError::MiddlewareError {
            e: SignerMiddlewareError::SignerError(e),
        } => crate::Error::SubmissionRejected(e.to_string()),
        e => crate::Error::SubmissionFailed(e.to_string()),
    }
}

#[async_trait::async_trait]
impl LeavesSource for EvmChain {
    async fn get_leaves(
        &self,
        pool: &PoolId,
        from: u32,
        to: u32,
    ) -> crate::Result<Vec<Leaf>> {
        let known = self
            .deposits
            .lock()
            .get(pool)
            .map_or(0, |log| log.leaves.len());
        if known < to as usize {
            self.refresh_deposits(pool).await?;
        }
        let deposits = self.deposits.lock();
        let leaves = deposits
            .get(pool)
            .map(|log| log.leaves.as_slice())
            .unwrap_or(&[]);
        let from = (from as usize).min(leaves.len());
        let to = (to as usize).clamp(from, leaves.len());
        Ok(leaves[from..to].to_vec())
    }
}

#[async_trait::async_trait]
impl ChainDataSource for EvmChain {
    async fn get_latest_root(&self, pool: &PoolId) -> crate::Result<H256> {
        let root = self
            .reader(pool)?
            .get_last_root()
            .call()
            .await
            .map_err(read_error)?;
        Ok(H256::from(root))
    }

    async fn get_neighbor_roots(
        &self,
        pool: &PoolId,
    ) -> crate::Result<Vec<H256>> {
        let roots = self
            .reader(pool)?
            .get_latest_neighbor_roots()
            .call()
            .await
            .map_err(read_error)?;
        Ok(roots.into_iter().map(H256::from).collect())
    }

    async fn denomination(&self, pool: &PoolId) -> crate::Result<U256> {
        self.reader(pool)?
            .denomination()
            .call()
            .await
            .map_err(read_error)
    }
}

#[async_trait::async_trait]
impl TransactionSubmitter for EvmChain {
    #[tracing::instrument(skip_all, fields(pool = %call.pool))]
    async fn submit(
        &self,
        call: &WithdrawCall,
        signer: &SignerIdentity,
        notifier: &TxNotifier,
    ) -> crate::Result<TxReference> {
        let wallet = match &self.wallet {
            Some(wallet) if self.signer().as_ref() == Some(signer) => {
                wallet.clone()
            }
            _ => return Err(crate::Error::NoAccountAvailable),
        };
        let client =
            Arc::new(SignerMiddleware::new(self.provider.clone(), wallet));
        let contract = self.contract(&call.pool, client)?;
        let tx = contract.withdraw(
            Bytes::from(call.proof.clone()),
            call.root.to_fixed_bytes(),
            call.nullifier_hash.to_fixed_bytes(),
            evm_address(&call.recipient)?,
            evm_address(&call.relayer)?,
            call.fee,
            call.refund,
        );
        let failed = |e: crate::Error| {
            notifier.notify(TxNotification::Failed {
                method: call.method.clone(),
                reason: e.to_string(),
            });
            e
        };
        notifier.notify(TxNotification::BeforeSend {
            method: call.method.clone(),
        });
        // a dry run spares the fees of a transaction that would revert
        if let Err(e) = tx.call().await {
            tracing::error!("Withdraw would revert: {}", e);
            return Err(failed(submission_error(e)));
        }
        let pending =
            tx.send().await.map_err(|e| failed(submission_error(e)))?;
        let tx_hash = *pending;
        tracing::debug!("Withdraw tx {:?} is pending", tx_hash);
        let receipt = pending.interval(self.tx_poll_interval).await;
        match receipt {
            Ok(Some(receipt)) if receipt.status == Some(0u64.into()) => {
                Err(failed(crate::Error::SubmissionFailed(format!(
                    "transaction {tx_hash:?} reverted"
                ))))
            }
            Ok(Some(receipt)) => {
                let tx = TxReference(format!("{:?}", receipt.transaction_hash));
                tracing::debug!("Finalized withdraw tx {}", tx);
                notifier.notify(TxNotification::Finalize {
                    method: call.method.clone(),
                    tx: tx.clone(),
                });
                Ok(tx)
            }
            Ok(None) => Err(failed(crate::Error::SubmissionFailed(format!(
                "transaction {tx_hash:?} was dropped from the mempool"
            )))),
            Err(e) => Err(failed(crate::Error::SubmissionFailed(e.to_string()))),
        }
    }
}

impl WithdrawalBackend for EvmChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }
}
