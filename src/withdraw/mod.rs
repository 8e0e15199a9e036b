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
//! The withdrawal state machine.
//!
//! ```text
//! Ideal -> GeneratingZk -> SendingTransaction -> Done -> Ideal
//!               |                  |
//!               +------> Failed <--+ -> Ideal
//! ```
//!
//! A [`Withdrawer`] runs one withdrawal at a time and is reusable once it is
//! back in [`WithdrawState::Ideal`]. Progress is published as
//! [`WithdrawEvent`]s on a broadcast channel.
use derive_more::Display;
use serde::Serialize;

use crate::backend::TxNotification;
use crate::relayer::protocol::RelayedWithdrawResult;
use crate::types::TxReference;

mod controller;
mod session;

pub use controller::{Withdrawer, WithdrawerParts};
pub use session::WithdrawalSession;

/// The state of a [`Withdrawer`].
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
pub enum WithdrawState {
    /// Ready for a withdrawal.
    #[display(fmt = "ideal")]
    Ideal,
    /// Syncing leaves, negotiating the fee and computing the proof.
    #[display(fmt = "generating-zk")]
    GeneratingZk,
    /// Submitting the withdraw transaction.
    #[display(fmt = "sending-transaction")]
    SendingTransaction,
    /// The withdrawal succeeded.
    #[display(fmt = "done")]
    Done,
    /// The withdrawal failed.
    #[display(fmt = "failed")]
    Failed,
}

/// Input errors found before a withdrawal starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    /// Why the note was rejected.
    pub note: Option<String>,
    /// Why the recipient was rejected.
    pub recipient: Option<String>,
}

impl ValidationErrors {
    /// Whether both inputs are valid.
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.recipient.is_none()
    }
}

/// What a [`Withdrawer`] publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawEvent {
    /// The state changed.
    StateChange(WithdrawState),
    /// The withdrawal failed, with a human readable cause.
    Error(String),
    /// The inputs were rejected before the withdrawal started.
    ValidationError(ValidationErrors),
    /// The withdrawal was cancelled and its proof discarded.
    Cancelled,
    /// Progress reported by the relayer.
    Relayer(RelayedWithdrawResult),
    /// Progress of a self-submitted transaction.
    Transaction(TxNotification),
}

/// How a call to [`Withdrawer::withdraw`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// The withdrawal is finalized.
    Done(TxReference),
    /// The withdrawal was cancelled before its transaction was sent.
    Cancelled,
    /// Another withdrawal is in progress, nothing was done.
    Ignored,
}
