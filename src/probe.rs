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
use derive_more::Display;
/// Target for logger
pub const TARGET: &str = "webb_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the withdraw session changes its state.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Leaves sync progress for a pool.
    #[display(fmt = "leaves_sync")]
    LeavesSync,
    /// Leaves cache state for a pool.
    #[display(fmt = "leaves_store")]
    LeavesStore,
    /// Relayer discovery and selection.
    #[display(fmt = "relayer")]
    Relayer,
    /// Relayer fee negotiation.
    #[display(fmt = "fee_quote")]
    FeeQuote,
    /// Zero-knowledge proof generation.
    #[display(fmt = "proof_generation")]
    ProofGeneration,
    /// Cross-chain root reconciliation.
    #[display(fmt = "root_reconcile")]
    RootReconcile,
    /// Relayed transaction state.
    #[display(fmt = "relay_tx")]
    RelayTx,
    /// Self-submitted withdraw transaction state.
    #[display(fmt = "withdraw")]
    Withdraw,
    /// When we will retry to do something.
    #[display(fmt = "retry")]
    Retry,
}
