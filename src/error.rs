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
use std::time::Duration;

use ethereum_types::H256;

use crate::types::{PoolId, TypedChainId};

/// An enum of all possible errors that could be encountered while
/// coordinating a withdrawal.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::large_enum_variant)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while talking to a relayer over http.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Error in the relayer websocket channel.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// The note string could not be decoded.
    #[error("Malformed note: {}", _0)]
    MalformedNote(String),
    /// An account (recipient or relayer) is not valid for its chain family.
    #[error("Invalid account {}: {}", account, reason)]
    InvalidAccount {
        /// The account as given by the caller.
        account: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The note's commitment is not part of the pool's leaves.
    #[error("Leaf {:?} was not found in the pool, is the note for this pool?", commitment)]
    LeafNotFound {
        /// The commitment we were looking for.
        commitment: H256,
    },
    /// The chain data source could not deliver the leaves.
    #[error("Leaves sync unavailable: {}", _0)]
    SyncUnavailable(String),
    /// The relayer does not serve the pool of the note.
    #[error("Relayer {} does not support pool {}", relayer, pool)]
    UnsupportedPool {
        /// The relayer endpoint.
        relayer: String,
        /// The pool that was asked for.
        pool: PoolId,
    },
    /// The proving capability failed to produce a proof.
    #[error("Proof generation failed: {}", _0)]
    ProofGenerationFailed(String),
    /// None of the destination roots can be proven from the source leaves.
    #[error(
        "No root of {} matches the source tree ({} candidates checked)",
        pool,
        candidates
    )]
    StaleRoot {
        /// The destination pool.
        pool: PoolId,
        /// How many roots were checked.
        candidates: usize,
    },
    /// The relayer did not finish the withdrawal in time.
    #[error("Relayer {} timed out after {:?}", endpoint, after)]
    RelayerTimeout {
        /// The relayer endpoint.
        endpoint: String,
        /// The elapsed timeout.
        after: Duration,
    },
    /// The relayer channel could not be opened or was closed early.
    #[error("Relayer unavailable: {}", _0)]
    RelayerUnavailable(String),
    /// The relayer reported an error while relaying the withdrawal.
    #[error("{}", _0)]
    RelayerErrored(String),
    /// The user declined to sign the transaction.
    #[error("Withdraw rejected: {}", _0)]
    SubmissionRejected(String),
    /// The chain rejected the transaction.
    #[error("Withdraw failed: {}", _0)]
    SubmissionFailed(String),
    /// No pool is configured for the given chain, asset and amount.
    #[error("Pool Not Found: {} {} on {}", amount, token_symbol, chain_id)]
    PoolNotFound {
        /// The chain of the pool.
        chain_id: TypedChainId,
        /// The pool asset.
        token_symbol: String,
        /// The pool amount.
        amount: String,
    },
    /// No backend is registered for the chain.
    #[error("Chain Not Found: {}", chain_id)]
    ChainNotFound {
        /// The chain id of the chain.
        chain_id: TypedChainId,
    },
    /// Self-submission needs a signer but none was configured.
    #[error("No account available to sign the withdraw transaction")]
    NoAccountAvailable,
    /// Poseidon hasher error.
    #[error("Hasher error: {}", _0)]
    Hasher(String),
}

impl Error {
    /// Whether the failure reflects transient external state, so the same
    /// withdrawal may succeed when tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RelayerTimeout { .. }
                | Self::RelayerUnavailable(_)
                | Self::StaleRoot { .. }
                | Self::SyncUnavailable(_)
        )
    }

    /// Whether the failure is a syntactic input error, surfaced before any
    /// work starts.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MalformedNote(_) | Self::InvalidAccount { .. })
    }
}

/// A type alias for the result of the withdraw coordinator, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
