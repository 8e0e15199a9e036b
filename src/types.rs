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
use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A deposit commitment stored at a fixed index of a pool's merkle tree.
pub type Leaf = ethereum_types::H256;

const EVM_CHAIN_TYPE: u16 = 0x0100;
const SUBSTRATE_CHAIN_TYPE: u16 = 0x0200;

/// The family of a chain, which decides how accounts are encoded and how
/// transactions are submitted.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainFamily {
    /// EVM based chains.
    #[display(fmt = "evm")]
    Evm,
    /// Substrate based chains.
    #[display(fmt = "substrate")]
    Substrate,
}

/// A chain id tagged with its family.
///
/// Serialized in configs as `evm:5001` or `substrate:1080`, and inside notes
/// as the 48 bit typed chain id used by the bridge (chain type in the upper
/// 16 bits, chain id in the lower 32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypedChainId {
    /// An EVM chain.
    Evm(u32),
    /// A Substrate chain.
    Substrate(u32),
}

impl TypedChainId {
    /// The family of this chain.
    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Evm(_) => ChainFamily::Evm,
            Self::Substrate(_) => ChainFamily::Substrate,
        }
    }

    /// The chain id without its type.
    pub fn underlying_chain_id(&self) -> u32 {
        match self {
            Self::Evm(id) | Self::Substrate(id) => *id,
        }
    }

    /// The typed chain id as a single integer.
    pub fn chain_id(&self) -> u64 {
        let chain_type = match self {
            Self::Evm(_) => EVM_CHAIN_TYPE,
            Self::Substrate(_) => SUBSTRATE_CHAIN_TYPE,
        };
        (u64::from(chain_type) << 32) | u64::from(self.underlying_chain_id())
    }

    /// Decodes a typed chain id from its integer form.
    pub fn from_chain_id(value: u64) -> Option<Self> {
        let id = (value & u64::from(u32::MAX)) as u32;
        match value >> 32 {
            v if v == u64::from(EVM_CHAIN_TYPE) => Some(Self::Evm(id)),
            v if v == u64::from(SUBSTRATE_CHAIN_TYPE) => {
                Some(Self::Substrate(id))
            }
            _ => None,
        }
    }
}

impl fmt::Display for TypedChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family(), self.underlying_chain_id())
    }
}

impl FromStr for TypedChainId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = crate::Error::Generic(
            "expected a chain id like `evm:5001` or `substrate:1080`",
        );
        let (family, id) = s.split_once(':').ok_or(invalid)?;
        let id = id.parse::<u32>().map_err(|_| {
            crate::Error::Generic("chain id must be a 32 bit number")
        })?;
        match family {
            "evm" => Ok(Self::Evm(id)),
            "substrate" => Ok(Self::Substrate(id)),
            _ => Err(crate::Error::Generic(
                "expected a chain id like `evm:5001` or `substrate:1080`",
            )),
        }
    }
}

impl Serialize for TypedChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypedChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies one pool (mixer or anchor) on a chain.
///
/// For EVM chains the address is the contract address, for Substrate chains
/// it is the tree id of the mixer pallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId {
    /// The chain the pool lives on.
    pub chain_id: TypedChainId,
    /// The pool address (or tree id).
    pub address: String,
}

impl PoolId {
    /// Creates a new pool id, normalizing EVM addresses to lower case.
    pub fn new(chain_id: TypedChainId, address: impl Into<String>) -> Self {
        let address = address.into();
        let address = match chain_id.family() {
            ChainFamily::Evm => address.to_lowercase(),
            ChainFamily::Substrate => address,
        };
        Self { chain_id, address }
    }

    /// Key used by the persistent stores.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.chain_id.chain_id().to_be_bytes().to_vec();
        bytes.extend_from_slice(self.address.as_bytes());
        bytes
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain_id, self.address)
    }
}

/// A reference to a submitted transaction, usually its hash.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxReference(pub String);

/// The account that signs self-submitted transactions.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerIdentity(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_chain_id_integer_form() {
        let evm = TypedChainId::Evm(5001);
        assert_eq!(evm.chain_id(), 0x0100_0000_1389);
        assert_eq!(TypedChainId::from_chain_id(evm.chain_id()), Some(evm));
        let substrate = TypedChainId::Substrate(1080);
        assert_eq!(
            TypedChainId::from_chain_id(substrate.chain_id()),
            Some(substrate)
        );
        assert_eq!(TypedChainId::from_chain_id(0x0300_0000_0001), None);
    }

    #[test]
    fn typed_chain_id_text_form() {
        let id: TypedChainId = "substrate:1080".parse().unwrap();
        assert_eq!(id, TypedChainId::Substrate(1080));
        assert_eq!(id.to_string(), "substrate:1080");
        assert!("cosmos:1".parse::<TypedChainId>().is_err());
        assert!("evm:".parse::<TypedChainId>().is_err());
        let json = serde_json::to_string(&TypedChainId::Evm(1)).unwrap();
        assert_eq!(json, "\"evm:1\"");
    }

    #[test]
    fn evm_pool_addresses_are_lowercased() {
        let pool = PoolId::new(TypedChainId::Evm(1), "0xABCdef");
        assert_eq!(pool.address, "0xabcdef");
        let pool = PoolId::new(TypedChainId::Substrate(1), "5GrwvaEF");
        assert_eq!(pool.address, "5GrwvaEF");
    }
}
