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
//! Relayers: discovery, fee negotiation and relayed submission.
use std::fmt;
use std::sync::Arc;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::ChainDataSource;
use crate::types::{PoolId, TypedChainId};

use self::transport::{RelayerChannel, RelayerConnector};

/// Reads pool leaves from a relayer's leaves cache.
pub mod leaves;
/// Scripted relayers, used to exercise the relayed withdraw flow.
pub mod mocked;
/// The relayer wire protocol.
pub mod protocol;
/// Relayer discovery.
pub mod registry;
/// Relayed submission of a withdraw proof.
pub mod submission;
/// Duplex channels to relayers.
pub mod transport;

/// Fee percentages are scaled by this factor before being applied.
const FEE_SCALE: u64 = 1_000_000;

/// A pool a relayer relays withdrawals for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedContract {
    /// The pool address (or tree id).
    pub address: String,
    /// The deposit size of the pool, if declared.
    pub size: Option<f64>,
    /// The pool asset, if declared.
    pub token_symbol: Option<String>,
    /// The fee the relayer takes, as a fraction of the pool denomination.
    pub withdraw_fee_percentage: f64,
}

/// A chain a relayer is active on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedChain {
    /// The chain.
    pub chain_id: TypedChainId,
    /// The account receiving relaying fees on this chain.
    pub beneficiary: Option<String>,
    /// The pools relayed on this chain.
    pub contracts: Vec<SupportedContract>,
}

/// What a relayer declares it supports.
///
/// This is an advisory snapshot: fees are always recomputed from the on
/// chain denomination when a withdrawal is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerCapabilities {
    /// The relayer's base url.
    pub endpoint: Url,
    /// The chains the relayer is active on.
    pub chains: Vec<SupportedChain>,
}

impl RelayerCapabilities {
    /// The relayer's support for a chain.
    pub fn chain(&self, chain_id: TypedChainId) -> Option<&SupportedChain> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// The relayer's entry for a pool. Addresses are compared ignoring case.
    pub fn contract(&self, pool: &PoolId) -> Option<&SupportedContract> {
        self.chain(pool.chain_id)?
            .contracts
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(&pool.address))
    }

    /// The fee beneficiary on a chain.
    pub fn beneficiary(&self, chain_id: TypedChainId) -> Option<&str> {
        self.chain(chain_id)?.beneficiary.as_deref()
    }

    /// Whether any pool of the relayer fits the query.
    pub fn matches(&self, query: &RelayerQuery) -> bool {
        let Some(chain) = self.chain(query.chain_id) else {
            return false;
        };
        chain.contracts.iter().any(|c| query.accepts(c))
    }
}

impl fmt::Display for RelayerCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

/// Criteria used to discover relayers.
///
/// Criteria left as `None` match anything, as do pools that do not declare
/// the corresponding field.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayerQuery {
    /// The chain the relayer must be active on.
    pub chain_id: TypedChainId,
    /// The pool address.
    pub address: Option<String>,
    /// The pool asset.
    pub token_symbol: Option<String>,
    /// The pool deposit size.
    pub amount: Option<f64>,
}

impl RelayerQuery {
    /// Relayers active on `chain_id`.
    pub fn chain(chain_id: TypedChainId) -> Self {
        Self {
            chain_id,
            address: None,
            token_symbol: None,
            amount: None,
        }
    }

    fn accepts(&self, contract: &SupportedContract) -> bool {
        let address = match &self.address {
            Some(address) => contract.address.eq_ignore_ascii_case(address),
            None => true,
        };
        let symbol = match (&self.token_symbol, &contract.token_symbol) {
            (Some(wanted), Some(declared)) => {
                wanted.eq_ignore_ascii_case(declared)
            }
            _ => true,
        };
        let amount = match (self.amount, contract.size) {
            (Some(wanted), Some(size)) => wanted == size,
            _ => true,
        };
        address && symbol && amount
    }
}

/// A relayer fee, for one withdrawal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeQuote {
    /// The declared fee percentage.
    pub withdraw_fee_percentage: f64,
    /// The fee in the asset's smallest unit.
    pub total_fees: U256,
}

/// `principle * fee_percent`, computed on integers.
///
/// The percentage is scaled by one million and rounded before being
/// multiplied, so repeated quotes always agree.
pub fn calculate_fee(fee_percent: f64, principle: U256) -> U256 {
    let mill_fee = (fee_percent * FEE_SCALE as f64).round() as u64;
    let mill_u256 = principle.saturating_mul(U256::from(mill_fee));
    mill_u256 / U256::from(FEE_SCALE)
}

/// The fee `relayer` takes for withdrawing from `pool`.
///
/// Fails with [`crate::Error::UnsupportedPool`] when the relayer does not
/// relay for the pool.
#[tracing::instrument(skip(relayer, source), fields(relayer = %relayer.endpoint))]
pub async fn negotiate_fee<D>(
    relayer: &RelayerCapabilities,
    pool: &PoolId,
    source: &D,
) -> crate::Result<FeeQuote>
where
    D: ChainDataSource + ?Sized,
{
    let contract =
        relayer
            .contract(pool)
            .ok_or_else(|| crate::Error::UnsupportedPool {
                relayer: relayer.endpoint.to_string(),
                pool: pool.clone(),
            })?;
    let denomination = source.denomination(pool).await?;
    let total_fees =
        calculate_fee(contract.withdraw_fee_percentage, denomination);
    tracing::event!(
        target: crate::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %crate::probe::Kind::FeeQuote,
        pool = %pool,
        %denomination,
        withdraw_fee_percentage = contract.withdraw_fee_percentage,
        %total_fees,
    );
    Ok(FeeQuote {
        withdraw_fee_percentage: contract.withdraw_fee_percentage,
        total_fees,
    })
}

/// A relayer selected for one withdrawal, bound to the pool it relays for.
///
/// Owned by a single withdraw session.
#[derive(Clone)]
pub struct ActiveRelayer {
    capabilities: RelayerCapabilities,
    pool: PoolId,
    beneficiary: String,
    connector: Arc<dyn RelayerConnector>,
}

impl fmt::Debug for ActiveRelayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRelayer")
            .field("endpoint", &self.capabilities.endpoint.as_str())
            .field("pool", &self.pool)
            .field("beneficiary", &self.beneficiary)
            .finish()
    }
}

impl ActiveRelayer {
    /// Binds a relayer to the pool it will relay for.
    pub fn bind(
        capabilities: RelayerCapabilities,
        pool: PoolId,
        connector: Arc<dyn RelayerConnector>,
    ) -> crate::Result<Self> {
        if capabilities.contract(&pool).is_none() {
            return Err(crate::Error::UnsupportedPool {
                relayer: capabilities.endpoint.to_string(),
                pool,
            });
        }
        let beneficiary = capabilities
            .beneficiary(pool.chain_id)
            .ok_or(crate::Error::Generic(
                "relayer declares no beneficiary account for the chain",
            ))?
            .to_owned();
        Ok(Self {
            capabilities,
            pool,
            beneficiary,
            connector,
        })
    }

    /// What the relayer declared.
    pub fn capabilities(&self) -> &RelayerCapabilities {
        &self.capabilities
    }

    /// The relayer's base url.
    pub fn endpoint(&self) -> &Url {
        &self.capabilities.endpoint
    }

    /// The pool the relayer is bound to.
    pub fn pool(&self) -> &PoolId {
        &self.pool
    }

    /// The account receiving the fee.
    pub fn beneficiary(&self) -> &str {
        &self.beneficiary
    }

    /// A fresh fee quote for the bound pool.
    pub async fn fee_quote<D>(&self, source: &D) -> crate::Result<FeeQuote>
    where
        D: ChainDataSource + ?Sized,
    {
        negotiate_fee(&self.capabilities, &self.pool, source).await
    }

    /// Opens a channel to the relayer.
    pub async fn open_channel(&self) -> crate::Result<Box<dyn RelayerChannel>> {
        self.connector.connect(&self.capabilities.endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::mocked::ScriptedConnector;
    use super::*;
    use crate::backend::mocked::MockedChain;
    use crate::types::ChainFamily;

    fn relayer(fee: f64) -> RelayerCapabilities {
        RelayerCapabilities {
            endpoint: Url::parse("http://localhost:9955").unwrap(),
            chains: vec![SupportedChain {
                chain_id: TypedChainId::Evm(5001),
                beneficiary: Some(
                    "0x58fcd47ece3ed5d74ac38d1f0dc0ea5ed7b5bd4c".into(),
                ),
                contracts: vec![SupportedContract {
                    address: "0xD24260C102B5D128cbEFA0F655E5be3c2370677C"
                        .into(),
                    size: Some(1.0),
                    token_symbol: Some("WEBB".into()),
                    withdraw_fee_percentage: fee,
                }],
            }],
        }
    }

    fn pool() -> PoolId {
        PoolId::new(
            TypedChainId::Evm(5001),
            "0xd24260c102b5d128cbefa0f655e5be3c2370677c",
        )
    }

    #[test]
    fn fee_is_exact() {
        let denomination = U256::from(1_000_000u64);
        for _ in 0..10 {
            assert_eq!(calculate_fee(0.01, denomination), 10_000u64.into());
        }
        // 0.035 * 1e6 is 34999.99.. as a float
        assert_eq!(
            calculate_fee(0.035, U256::from(1_000_000u64)),
            35_000u64.into()
        );
        assert_eq!(calculate_fee(0.0, denomination), U256::zero());
        let ether = U256::exp10(18);
        assert_eq!(calculate_fee(0.05, ether), U256::exp10(16) * U256::from(5u64));
    }

    #[tokio::test]
    async fn negotiates_from_the_chain_denomination() -> anyhow::Result<()> {
        let chain = MockedChain::new(ChainFamily::Evm);
        chain.set_denomination(&pool(), U256::from(1_000_000u64));
        let quote = negotiate_fee(&relayer(0.01), &pool(), &chain).await?;
        assert_eq!(quote.total_fees, U256::from(10_000u64));
        assert_eq!(quote.withdraw_fee_percentage, 0.01);
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_pool_is_reported() {
        let chain = MockedChain::new(ChainFamily::Evm);
        let other = PoolId::new(TypedChainId::Evm(5001), "0x01");
        let err =
            negotiate_fee(&relayer(0.01), &other, &chain).await.unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedPool { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn queries_match_declared_fields() {
        let relayer = relayer(0.01);
        let mut query = RelayerQuery::chain(TypedChainId::Evm(5001));
        assert!(relayer.matches(&query));
        query.token_symbol = Some("webb".into());
        query.amount = Some(1.0);
        assert!(relayer.matches(&query));
        query.amount = Some(10.0);
        assert!(!relayer.matches(&query));
        assert!(!relayer.matches(&RelayerQuery::chain(TypedChainId::Evm(1))));
    }

    #[test]
    fn binding_needs_a_supported_pool() {
        let connector = Arc::new(ScriptedConnector::default());
        let active =
            ActiveRelayer::bind(relayer(0.01), pool(), connector.clone())
                .unwrap();
        assert_eq!(
            active.beneficiary(),
            "0x58fcd47ece3ed5d74ac38d1f0dc0ea5ed7b5bd4c"
        );
        let other = PoolId::new(TypedChainId::Evm(5001), "0x01");
        assert!(matches!(
            ActiveRelayer::bind(relayer(0.01), other, connector),
            Err(crate::Error::UnsupportedPool { .. })
        ));
    }
}
