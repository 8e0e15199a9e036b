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
use ethereum_types::U256;

use crate::backend::{MethodPath, WithdrawCall};
use crate::merkle::MerkleProofInput;
use crate::note::Note;
use crate::proving::PreparedProof;
use crate::relayer::ActiveRelayer;
use crate::types::{Leaf, PoolId};

/// One withdrawal attempt.
///
/// Created when a withdrawal starts and dropped when it ends. Each step of
/// the withdrawal fills in the fields the next one needs.
#[derive(Debug)]
pub struct WithdrawalSession {
    note: Note,
    recipient: String,
    dest_pool: PoolId,
    source_pool: PoolId,
    relayer: Option<ActiveRelayer>,
    pub(super) leaves: Vec<Leaf>,
    pub(super) leaf_index: u32,
    pub(super) fee: U256,
    pub(super) merkle: Option<MerkleProofInput>,
    pub(super) prepared: Option<PreparedProof>,
}

impl WithdrawalSession {
    pub(super) fn new(
        note: Note,
        recipient: String,
        dest_pool: PoolId,
        source_pool: PoolId,
        relayer: Option<ActiveRelayer>,
    ) -> Self {
        Self {
            note,
            recipient,
            dest_pool,
            source_pool,
            relayer,
            leaves: Vec::new(),
            leaf_index: 0,
            fee: U256::zero(),
            merkle: None,
            prepared: None,
        }
    }

    /// The note being withdrawn.
    pub fn note(&self) -> &Note {
        &self.note
    }

    /// The account receiving the funds.
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// The pool the withdrawal happens on.
    pub fn dest_pool(&self) -> &PoolId {
        &self.dest_pool
    }

    /// The pool the note was deposited in.
    pub fn source_pool(&self) -> &PoolId {
        &self.source_pool
    }

    /// Whether the note was deposited on another chain.
    pub fn is_cross_chain(&self) -> bool {
        self.note.is_cross_chain()
    }

    /// The relayer relaying this withdrawal, if any.
    pub fn relayer(&self) -> Option<&ActiveRelayer> {
        self.relayer.as_ref()
    }

    /// The withdraw transaction of the computed proof.
    ///
    /// Without a relayer the recipient is its own relayer and pays no fee.
    pub fn withdraw_call(&self) -> crate::Result<WithdrawCall> {
        let prepared = self.prepared.as_ref().ok_or(crate::Error::Generic(
            "the withdraw proof was not computed",
        ))?;
        let relayer = match &self.relayer {
            Some(relayer) => relayer.beneficiary().to_owned(),
            None => self.recipient.clone(),
        };
        Ok(WithdrawCall {
            pool: self.dest_pool.clone(),
            method: MethodPath::withdraw(self.dest_pool.chain_id.family()),
            proof: prepared.proof.0.clone(),
            root: prepared.merkle.root,
            nullifier_hash: prepared.nullifier_hash,
            recipient: self.recipient.clone(),
            relayer,
            fee: self.fee,
            refund: U256::zero(),
        })
    }
}
