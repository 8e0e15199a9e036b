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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ProvingInput, ProvingManager, ZkProof};

/// A prover answering a proof made of its public inputs.
///
/// A gated prover waits for its gate to be opened before answering, which
/// keeps a withdrawal in proof generation for as long as needed.
#[derive(Debug, Default)]
pub struct MockedProver {
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
    calls: AtomicUsize,
    last_input: Mutex<Option<ProvingInput>>,
}

impl MockedProver {
    /// A prover that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A prover that always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Default::default()
        }
    }

    /// A prover answering only once `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    /// Notified every time a proof is requested.
    pub fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    /// How many proofs were requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The inputs of the latest request.
    pub fn last_input(&self) -> Option<ProvingInput> {
        self.last_input.lock().clone()
    }
}

#[async_trait::async_trait]
impl ProvingManager for MockedProver {
    async fn compute(&self, input: ProvingInput) -> crate::Result<ZkProof> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock() = Some(input.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.failure {
            return Err(crate::Error::ProofGenerationFailed(reason.clone()));
        }
        let mut fee = [0u8; 32];
        input.fee.to_big_endian(&mut fee);
        let proof = [
            input.merkle.root.as_bytes(),
            input.nullifier_hash.as_bytes(),
            input.recipient.as_bytes(),
            input.relayer.as_bytes(),
            &fee[..],
        ]
        .concat();
        Ok(ZkProof(proof))
    }
}
