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
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Webb Withdraw Crate 🕸️
//!
//! A crate used to withdraw deposits from the Webb Mixer and Anchor pools,
//! either directly or through a relayer.
//!
//! ## Overview
//!
//! A deposit is represented by a secret note. Withdrawing it means proving,
//! in zero knowledge, that the note's commitment is a leaf of the pool's
//! merkle tree, without revealing which one. The withdraw coordinator runs
//! the whole pipeline:
//!
//!   1. Parse the note and validate the recipient.
//!   2. Sync the pool leaves and locate the note's leaf.
//!   3. Negotiate the fee with the selected relayer, if any.
//!   4. For notes deposited on another chain, find a root of the
//!      destination pool the source tree can be proven against.
//!   5. Compute the proof.
//!   6. Submit the withdrawal, through the relayer or with our own account.
//!
//! #### Relayed Withdrawals
//!
//! Relayers submit the withdraw transaction on behalf of the user for a
//! fee, so the recipient never appears as a transaction sender. Relayers
//! are discovered through their `/api/v1/info` endpoint and receive the
//! withdraw request over a websocket, streaming back its status until the
//! transaction is finalized.
//!
//! #### Chain Backends
//!
//! The pipeline is written once against [`backend::WithdrawalBackend`].
//! Each chain family provides leaves, roots and transaction submission
//! through it. EVM chains are read from the pool contract's events and
//! views through `ethers`, and Substrate nodes from the merkle tree pallet
//! rpc; [`backend::BackendRegistry::from_config`] builds them from the
//! `evm` and `substrate` sections of the configuration.
//!
//! # Features
//!
//! * `cli`: Enables the `webb-withdraw` command-line tool. By default, this is enabled.
//! * `integration-tests`: Logs as JSON, for integration tests. By default, this is disabled.

/// Chain backends, and the accounts they use.
pub mod backend;
/// A module for configuring the withdraw coordinator.
pub mod config;
/// A module for managing the context shared by withdrawals.
pub mod context;
/// The error type of the crate.
pub mod error;
/// Pool leaves synchronization.
pub mod leaves;
/// Poseidon hashing and pool merkle trees.
pub mod merkle;
/// Deposit notes.
pub mod note;
/// A module used for debugging withdraw lifecycle, sync state, or other state.
pub mod probe;
/// Withdraw proof generation.
pub mod proving;
/// Cross-chain root reconciliation.
pub mod reconcile;
/// Relayers: discovery, fees, and relayed submission.
pub mod relayer;
/// Retry policies.
pub mod retry;
/// The leaves cache.
pub mod store;
/// Chain ids, pools, and other shared types.
pub mod types;
/// The withdrawal state machine.
pub mod withdraw;

pub use error::{Error, Result};
