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
//! Commands sent to a relayer and the statuses it streams back.
//!
//! Everything is exchanged as JSON text frames. A withdrawal looks like
//!
//! ```json
//! {"substrate":{"mixerRelayTx":{"chainId":2199023256632,"id":"0",...}}}
//! ```
//!
//! and the relayer answers with a stream of `network`/`withdraw` statuses
//! until the transaction is finalized or errored.
#![allow(clippy::large_enum_variant)]

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::backend::WithdrawCall;
use crate::types::{ChainFamily, TxReference};

/// Proof bytes travel as `0x` prefixed hex.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x"))
            .map_err(serde::de::Error::custom)
    }
}

/// Contains data that is relayed to the Mixers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerRelayTransaction {
    /// one of the supported chains of this relayer
    pub chain_id: u64,
    /// The pool address, or the tree id of the mixer's underlying tree
    pub id: String,
    /// The zero-knowledge proof bytes
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    /// The target merkle root for the proof
    pub root: H256,
    /// The nullifier_hash for the proof
    pub nullifier_hash: H256,
    /// The recipient of the transaction
    pub recipient: String,
    /// The relayer of the transaction
    pub relayer: String,
    /// The relayer's fee for the transaction
    pub fee: U256,
    /// The refund for the transaction in native tokens
    pub refund: U256,
}

/// Contains data that is relayed to the Anchors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRelayTransaction {
    /// one of the supported chains of this relayer
    pub chain_id: u64,
    /// The anchor address, or tree id
    pub id: String,
    /// The zero-knowledge proof bytes
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    /// The roots the proof was made against
    pub roots: Vec<H256>,
    /// The nullifier_hash for the proof
    pub nullifier_hash: H256,
    /// The recipient of the transaction
    pub recipient: String,
    /// The relayer of the transaction
    pub relayer: String,
    /// The relayer's fee for the transaction
    pub fee: U256,
    /// The refund for the transaction in native tokens
    pub refund: U256,
    /// The refresh commitment, zero when withdrawing
    pub refresh_commitment: H256,
}

/// Withdraw commands for one chain family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayCommand {
    /// Withdraw from a mixer.
    MixerRelayTx(MixerRelayTransaction),
    /// Withdraw from an anchor, with a root of a linked chain.
    AnchorRelayTx(AnchorRelayTransaction),
}

/// A command sent to a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayerCommand {
    /// Commands for EVM chains.
    Evm(RelayCommand),
    /// Commands for Substrate chains.
    Substrate(RelayCommand),
    /// Liveness check.
    Ping(),
}

impl RelayerCommand {
    /// The relay request for a withdraw call.
    ///
    /// Cross chain withdrawals go to the anchor command, which carries the
    /// root of the linked chain the proof was made against.
    pub fn withdraw(call: &WithdrawCall, cross_chain: bool) -> Self {
        let chain_id = call.pool.chain_id.chain_id();
        let command = if cross_chain {
            RelayCommand::AnchorRelayTx(AnchorRelayTransaction {
                chain_id,
                id: call.pool.address.clone(),
                proof: call.proof.clone(),
                roots: vec![call.root],
                nullifier_hash: call.nullifier_hash,
                recipient: call.recipient.clone(),
                relayer: call.relayer.clone(),
                fee: call.fee,
                refund: call.refund,
                refresh_commitment: H256::zero(),
            })
        } else {
            RelayCommand::MixerRelayTx(MixerRelayTransaction {
                chain_id,
                id: call.pool.address.clone(),
                proof: call.proof.clone(),
                root: call.root,
                nullifier_hash: call.nullifier_hash,
                recipient: call.recipient.clone(),
                relayer: call.relayer.clone(),
                fee: call.fee,
                refund: call.refund,
            })
        };
        match call.pool.chain_id.family() {
            ChainFamily::Evm => Self::Evm(command),
            ChainFamily::Substrate => Self::Substrate(command),
        }
    }
}

/// The network status of the relayer, for the requested chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    /// Connecting to the chain.
    Connecting,
    /// Connected to the chain.
    Connected,
    /// The connection failed.
    Failed {
        /// Why.
        reason: String,
    },
    /// Disconnected from the chain.
    Disconnected,
    /// The relayer is not active on the chain.
    UnsupportedChain,
    /// The relayer does not relay for the pool.
    UnsupportedContract,
    /// The relayer account in the request is not the relayer's.
    InvalidRelayerAddress,
    /// The relayer is misconfigured for the chain.
    Misconfigured,
}

/// The status of a relayed withdraw transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WithdrawStatus {
    /// The transaction was received.
    Sent,
    /// The proof passed the relayer's checks.
    Valid,
    /// The transaction was broadcast.
    Submitted {
        /// The transaction hash.
        #[serde(rename = "txHash")]
        tx_hash: H256,
    },
    /// The transaction was dropped and will be resubmitted.
    DroppedFromMemPool,
    /// The transaction is finalized.
    Finalized {
        /// The transaction hash.
        #[serde(rename = "txHash")]
        tx_hash: H256,
    },
    /// The withdrawal failed.
    Errored {
        /// Error code.
        #[serde(default)]
        code: i32,
        /// Why.
        reason: String,
    },
}

/// A frame sent by the relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandResponse {
    /// Answer to a ping.
    Pong(),
    /// Network status.
    Network(NetworkStatus),
    /// Withdraw status.
    Withdraw(WithdrawStatus),
    /// The command could not be handled.
    Error(String),
}

/// The progress of a relayed withdrawal, in the order
/// `PreFlight -> OnFlight -> Continue* -> CleanExit | Errored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayedWithdrawResult {
    /// The relayer accepted the request and is validating it.
    PreFlight,
    /// The transaction was broadcast.
    OnFlight,
    /// An intermediate confirmation.
    Continue(Option<String>),
    /// The transaction is finalized.
    CleanExit(TxReference),
    /// The withdrawal failed.
    Errored(String),
}

impl RelayedWithdrawResult {
    /// Whether this ends the withdrawal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CleanExit(_) | Self::Errored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum Phase {
    #[default]
    Idle,
    PreFlight,
    OnFlight,
    Closed,
}

/// Turns relayer frames into [`RelayedWithdrawResult`]s.
///
/// Results always come out in protocol order: when a relayer skips a phase
/// (say it reports `submitted` first) the missing phases are emitted before
/// it. Nothing is emitted once the withdrawal ended.
#[derive(Debug, Default)]
pub struct RelayedWithdrawWatcher {
    phase: Phase,
}

impl RelayedWithdrawWatcher {
    /// A watcher for a new withdrawal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal result was emitted.
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// The results implied by a relayer frame.
    pub fn advance(
        &mut self,
        response: CommandResponse,
    ) -> Vec<RelayedWithdrawResult> {
        use CommandResponse::*;
        use NetworkStatus as N;
        use WithdrawStatus as W;

        if self.is_closed() {
            return Vec::new();
        }
        match response {
            Pong() => Vec::new(),
            Network(N::Connecting | N::Connected)
            | Withdraw(W::Sent | W::Valid) => self.reach(Phase::PreFlight),
            Withdraw(W::Submitted { tx_hash }) => {
                if self.phase == Phase::OnFlight {
                    vec![RelayedWithdrawResult::Continue(Some(format!(
                        "resubmitted as {tx_hash:?}"
                    )))]
                } else {
                    self.reach(Phase::OnFlight)
                }
            }
            Withdraw(W::DroppedFromMemPool) => {
                let mut results = self.reach(Phase::OnFlight);
                results.push(RelayedWithdrawResult::Continue(Some(
                    "dropped from the mempool".into(),
                )));
                results
            }
            Withdraw(W::Finalized { tx_hash }) => {
                let mut results = self.reach(Phase::OnFlight);
                results.push(RelayedWithdrawResult::CleanExit(TxReference(
                    format!("{tx_hash:?}"),
                )));
                self.phase = Phase::Closed;
                results
            }
            Withdraw(W::Errored { reason, .. }) => self.fail(reason),
            Network(N::Failed { reason }) => self.fail(reason),
            Network(N::Disconnected) => self.fail("Relayer disconnected"),
            Network(N::UnsupportedChain) => self.fail("Unsupported chain"),
            Network(N::UnsupportedContract) => {
                self.fail("Unsupported contract")
            }
            Network(N::InvalidRelayerAddress) => {
                self.fail("Invalid relayer address")
            }
            Network(N::Misconfigured) => self.fail("Relayer misconfigured"),
            Error(message) => self.fail(message),
        }
    }

    fn reach(&mut self, target: Phase) -> Vec<RelayedWithdrawResult> {
        let mut results = Vec::new();
        if self.phase < Phase::PreFlight && target >= Phase::PreFlight {
            results.push(RelayedWithdrawResult::PreFlight);
        }
        if self.phase < Phase::OnFlight && target >= Phase::OnFlight {
            results.push(RelayedWithdrawResult::OnFlight);
        }
        self.phase = self.phase.max(target);
        results
    }

    fn fail(&mut self, reason: impl Into<String>) -> Vec<RelayedWithdrawResult> {
        self.phase = Phase::Closed;
        vec![RelayedWithdrawResult::Errored(reason.into())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MethodPath;
    use crate::types::{PoolId, TypedChainId};
    use RelayedWithdrawResult::*;

    fn call() -> WithdrawCall {
        WithdrawCall {
            pool: PoolId::new(TypedChainId::Substrate(1080), "0"),
            method: MethodPath::withdraw(ChainFamily::Substrate),
            proof: vec![0xde, 0xad],
            root: H256::repeat_byte(1),
            nullifier_hash: H256::repeat_byte(2),
            recipient: "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"
                .into(),
            relayer: "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty"
                .into(),
            fee: U256::from(10u64),
            refund: U256::zero(),
        }
    }

    #[test]
    fn withdraw_request_shape() {
        let command = RelayerCommand::withdraw(&call(), false);
        let json = serde_json::to_value(&command).unwrap();
        let tx = &json["substrate"]["mixerRelayTx"];
        assert_eq!(
            tx["chainId"],
            serde_json::json!(TypedChainId::Substrate(1080).chain_id())
        );
        assert_eq!(tx["id"], "0");
        assert_eq!(tx["proof"], "0xdead");
        assert!(tx["nullifierHash"].is_string());
        let back: RelayerCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, command);

        let command = RelayerCommand::withdraw(&call(), true);
        let json = serde_json::to_value(&command).unwrap();
        let roots = &json["substrate"]["anchorRelayTx"]["roots"];
        assert_eq!(roots.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn parses_relayer_frames() {
        let frames = [
            r#"{"network":"connected"}"#,
            r#"{"withdraw":"sent"}"#,
            r#"{"withdraw":{"submitted":{"txHash":"0x0101010101010101010101010101010101010101010101010101010101010101"}}}"#,
            r#"{"withdraw":{"errored":{"code":-32000,"reason":"insufficient relayer balance"}}}"#,
            r#"{"network":{"failed":{"reason":"boom"}}}"#,
            r#"{"error":"bad command"}"#,
            r#"{"pong":[]}"#,
        ];
        for frame in frames {
            serde_json::from_str::<CommandResponse>(frame).unwrap();
        }
    }

    #[test]
    fn emits_results_in_protocol_order() {
        let mut watcher = RelayedWithdrawWatcher::new();
        let tx_hash = H256::repeat_byte(7);
        let frames = vec![
            CommandResponse::Network(NetworkStatus::Connected),
            CommandResponse::Withdraw(WithdrawStatus::Sent),
            CommandResponse::Withdraw(WithdrawStatus::Submitted { tx_hash }),
            CommandResponse::Withdraw(WithdrawStatus::DroppedFromMemPool),
            CommandResponse::Withdraw(WithdrawStatus::Finalized { tx_hash }),
            CommandResponse::Withdraw(WithdrawStatus::Errored {
                code: 1,
                reason: "late".into(),
            }),
        ];
        let results: Vec<_> =
            frames.into_iter().flat_map(|f| watcher.advance(f)).collect();
        assert_eq!(
            results,
            vec![
                PreFlight,
                OnFlight,
                Continue(Some("dropped from the mempool".into())),
                CleanExit(TxReference(format!("{tx_hash:?}"))),
            ]
        );
        assert!(watcher.is_closed());
    }

    #[test]
    fn fills_in_skipped_phases() {
        let mut watcher = RelayedWithdrawWatcher::new();
        let tx_hash = H256::repeat_byte(7);
        let results = watcher.advance(CommandResponse::Withdraw(
            WithdrawStatus::Finalized { tx_hash },
        ));
        assert_eq!(
            results,
            vec![
                PreFlight,
                OnFlight,
                CleanExit(TxReference(format!("{tx_hash:?}")))
            ]
        );
    }

    #[test]
    fn errors_close_the_protocol() {
        let mut watcher = RelayedWithdrawWatcher::new();
        assert_eq!(
            watcher.advance(CommandResponse::Withdraw(WithdrawStatus::Sent)),
            vec![PreFlight]
        );
        assert_eq!(
            watcher.advance(CommandResponse::Withdraw(WithdrawStatus::Errored {
                code: 0,
                reason: "insufficient relayer balance".into(),
            })),
            vec![Errored("insufficient relayer balance".into())]
        );
        let tx_hash = H256::zero();
        assert!(watcher
            .advance(CommandResponse::Withdraw(WithdrawStatus::Finalized {
                tx_hash
            }))
            .is_empty());

        let mut watcher = RelayedWithdrawWatcher::new();
        assert_eq!(
            watcher.advance(CommandResponse::Network(
                NetworkStatus::InvalidRelayerAddress
            )),
            vec![Errored("Invalid relayer address".into())]
        );
    }
}
