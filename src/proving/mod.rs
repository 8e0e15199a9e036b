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
//! Assembles the circuit inputs of a withdrawal and hands them to the
//! proving capability.
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ethereum_types::{H256, U256};

use crate::backend::account::native_account_bytes;
use crate::merkle::{MerkleProofInput, MerkleTree, PoseidonHasher};
use crate::note::Note;
use crate::types::{ChainFamily, Leaf};

/// A proving capability that answers canned proofs.
pub mod mocked;
/// Runs a blocking prover on its own thread.
pub mod worker;

pub use worker::{CircuitProver, ProvingWorker};

/// The bytes of a zero-knowledge proof.
#[derive(Clone, PartialEq, Eq)]
pub struct ZkProof(pub Vec<u8>);

impl fmt::Debug for ZkProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZkProof({} bytes)", self.0.len())
    }
}

/// Everything the withdraw circuit takes.
#[derive(Clone)]
pub struct ProvingInput {
    /// The membership path of the note's leaf.
    pub merkle: MerkleProofInput,
    /// The note secret.
    pub secret: H256,
    /// The note nullifier.
    pub nullifier: H256,
    /// `Poseidon(nullifier, nullifier)`.
    pub nullifier_hash: H256,
    /// The recipient, in the circuit's native encoding.
    pub recipient: H256,
    /// The relayer, in the circuit's native encoding.
    pub relayer: H256,
    /// The relayer fee.
    pub fee: U256,
    /// The refund.
    pub refund: U256,
    /// The typed chain id the proof is for.
    pub chain_id: u64,
    /// The proving key of the circuit.
    pub proving_key: Arc<Vec<u8>>,
}

impl fmt::Debug for ProvingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvingInput")
            .field("leaf_index", &self.merkle.leaf_index)
            .field("root", &self.merkle.root)
            .field("nullifier_hash", &self.nullifier_hash)
            .field("recipient", &self.recipient)
            .field("relayer", &self.relayer)
            .field("fee", &self.fee)
            .field("refund", &self.refund)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

/// The external proving capability.
///
/// Computing a proof takes seconds; implementations must not block the
/// async runtime while doing so.
#[async_trait::async_trait]
pub trait ProvingManager: Send + Sync {
    /// Computes the proof of `input`.
    async fn compute(&self, input: ProvingInput) -> crate::Result<ZkProof>;
}

/// What the orchestrator needs to build one withdraw proof.
#[derive(Debug, Clone, Copy)]
pub struct ProofRequest<'a> {
    /// The note being withdrawn.
    pub note: &'a Note,
    /// The leaves of the note's pool.
    pub leaves: &'a [Leaf],
    /// The index of the note's leaf.
    pub leaf_index: u32,
    /// A path already bound to a root, used instead of the full tree.
    pub merkle: Option<&'a MerkleProofInput>,
    /// The family of the chain the withdrawal happens on.
    pub family: ChainFamily,
    /// The account receiving the funds.
    pub recipient: &'a str,
    /// The relayer beneficiary, when relaying.
    pub relayer: Option<&'a str>,
    /// The relayer fee.
    pub fee: U256,
    /// The refund.
    pub refund: U256,
}

/// A computed proof and the public inputs it was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedProof {
    /// The proof.
    pub proof: ZkProof,
    /// The path the proof was made against.
    pub merkle: MerkleProofInput,
    /// The nullifier hash of the note.
    pub nullifier_hash: H256,
}

/// Builds withdraw proofs. Holds no per-withdrawal state.
#[derive(Clone)]
pub struct ProofOrchestrator {
    hasher: PoseidonHasher,
    prover: Arc<dyn ProvingManager>,
    proving_key: Arc<Vec<u8>>,
}

impl fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofOrchestrator")
            .field("proving_key", &self.proving_key.len())
            .finish_non_exhaustive()
    }
}

impl ProofOrchestrator {
    /// An orchestrator proving with `prover` and `proving_key`.
    pub fn new(
        hasher: PoseidonHasher,
        prover: Arc<dyn ProvingManager>,
        proving_key: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            hasher,
            prover,
            proving_key,
        }
    }

    /// Assembles the circuit inputs and runs the prover once.
    ///
    /// Without a relayer the relayer input is the recipient. Any failure of
    /// the prover is a [`crate::Error::ProofGenerationFailed`], which is
    /// never retried here.
    #[tracing::instrument(skip_all, fields(leaf_index = request.leaf_index))]
    pub async fn build_proof(
        &self,
        request: ProofRequest<'_>,
    ) -> crate::Result<PreparedProof> {
        let merkle = match request.merkle {
            Some(merkle) => merkle.clone(),
            None => {
                let hasher = self.hasher.clone();
                let leaves = request.leaves.to_vec();
                let leaf_index = request.leaf_index;
                // hashing a whole pool takes a while, keep it off the runtime
                tokio::task::spawn_blocking(move || {
                    MerkleTree::new(&hasher, &leaves)?.proof(leaf_index)
                })
                .await
                .map_err(|e| {
                    crate::Error::Hasher(format!("merkle task join failed: {e}"))
                })??
            }
        };
        let recipient = native_account_bytes(request.family, request.recipient)?;
        let relayer = match request.relayer {
            Some(relayer) => native_account_bytes(request.family, relayer)?,
            None => recipient,
        };
        let nullifier_hash = request.note.nullifier_hash(&self.hasher)?;
        let input = ProvingInput {
            merkle: merkle.clone(),
            secret: *request.note.secret(),
            nullifier: *request.note.nullifier(),
            nullifier_hash,
            recipient,
            relayer,
            fee: request.fee,
            refund: request.refund,
            chain_id: request.note.dest_chain_id().chain_id(),
            proving_key: self.proving_key.clone(),
        };
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::ProofGeneration,
            started = true,
            root = ?merkle.root,
        );
        let started = Instant::now();
        let proof = self.prover.compute(input).await.map_err(|e| match e {
            crate::Error::ProofGenerationFailed(_) => e,
            e => crate::Error::ProofGenerationFailed(e.to_string()),
        })?;
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::ProofGeneration,
            finished = true,
            elapsed_ms = started.elapsed().as_millis() as u64,
            proof_len = proof.0.len(),
        );
        Ok(PreparedProof {
            proof,
            merkle,
            nullifier_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::mocked::MockedProver;
    use super::*;
    use crate::note::{Backend, Curve};
    use crate::types::TypedChainId;

    const RECIPIENT: &str = "0x58fcd47ece3ed5d74ac38d1f0dc0ea5ed7b5bd4c";
    const RELAYER: &str = "0x7758f98c1c487e5653795470eeab6c4698be541b";

    fn note() -> Note {
        Note::new(
            Backend::Arkworks,
            Curve::Bn254,
            TypedChainId::Evm(5001),
            TypedChainId::Evm(5001),
            "WEBB",
            18,
            "1",
            H256::repeat_byte(1),
            H256::repeat_byte(2),
        )
        .unwrap()
    }

    fn orchestrator(prover: Arc<MockedProver>) -> ProofOrchestrator {
        ProofOrchestrator::new(
            PoseidonHasher::new(),
            prover,
            Arc::new(vec![0u8; 4]),
        )
    }

    fn request<'a>(note: &'a Note, leaves: &'a [Leaf]) -> ProofRequest<'a> {
        ProofRequest {
            note,
            leaves,
            leaf_index: 1,
            merkle: None,
            family: ChainFamily::Evm,
            recipient: RECIPIENT,
            relayer: None,
            fee: U256::zero(),
            refund: U256::zero(),
        }
    }

    #[tokio::test]
    async fn self_relay_uses_the_recipient() -> anyhow::Result<()> {
        let hasher = PoseidonHasher::new();
        let note = note();
        let leaves =
            vec![H256::repeat_byte(9), note.leaf_commitment(&hasher)?];
        let prover = Arc::new(MockedProver::new());
        let prepared = orchestrator(prover.clone())
            .build_proof(request(&note, &leaves))
            .await?;
        let input = prover.last_input().unwrap();
        assert_eq!(input.relayer, input.recipient);
        assert_eq!(prover.calls(), 1);
        assert_eq!(
            prepared.merkle.root,
            MerkleTree::new(&hasher, &leaves)?.root()
        );
        assert_eq!(prepared.nullifier_hash, note.nullifier_hash(&hasher)?);
        assert_eq!(
            prepared.merkle.compute_root(&hasher, &leaves[1])?,
            prepared.merkle.root
        );
        Ok(())
    }

    #[tokio::test]
    async fn relayer_and_fee_reach_the_circuit() -> anyhow::Result<()> {
        let hasher = PoseidonHasher::new();
        let note = note();
        let leaves = vec![note.leaf_commitment(&hasher)?];
        let prover = Arc::new(MockedProver::new());
        orchestrator(prover.clone())
            .build_proof(ProofRequest {
                leaf_index: 0,
                relayer: Some(RELAYER),
                fee: U256::from(10u64),
                ..request(&note, &leaves)
            })
            .await?;
        let input = prover.last_input().unwrap();
        assert_ne!(input.relayer, input.recipient);
        assert_eq!(input.fee, U256::from(10u64));
        assert_eq!(input.chain_id, TypedChainId::Evm(5001).chain_id());
        Ok(())
    }

    #[tokio::test]
    async fn prover_failures_are_proof_failures() {
        let hasher = PoseidonHasher::new();
        let note = note();
        let leaves = vec![
            H256::repeat_byte(9),
            note.leaf_commitment(&hasher).unwrap(),
        ];
        let prover = Arc::new(MockedProver::failing("bad proving key"));
        let err = orchestrator(prover)
            .build_proof(request(&note, &leaves))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::ProofGenerationFailed(_)));
        assert!(!err.is_retryable());
    }
}
