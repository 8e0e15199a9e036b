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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use typed_builder::TypedBuilder;

use super::session::WithdrawalSession;
use super::{ValidationErrors, WithdrawEvent, WithdrawOutcome, WithdrawState};
use crate::backend::account::native_account_bytes;
use crate::backend::{
    BackendRegistry, TxNotifier, WithdrawCall, WithdrawalBackend,
};
use crate::config::WithdrawConfig;
use crate::leaves::{locate_leaf_index, LeafSynchronizer};
use crate::merkle::PoseidonHasher;
use crate::note::Note;
use crate::proving::{ProofOrchestrator, ProofRequest, ProvingManager};
use crate::reconcile::RootReconciler;
use crate::relayer::leaves::RelayerLeavesSource;
use crate::relayer::protocol::RelayerCommand;
use crate::relayer::registry::RelayerManager;
use crate::relayer::submission::RelayedSubmission;
use crate::relayer::transport::RelayerConnector;
use crate::relayer::{ActiveRelayer, RelayerCapabilities, RelayerQuery};
use crate::types::{ChainFamily, Leaf, SignerIdentity, TxReference};

/// What a [`Withdrawer`] is built from.
#[derive(TypedBuilder)]
pub struct WithdrawerParts {
    /// The configuration.
    config: WithdrawConfig,
    /// The backends of the chains we withdraw on.
    backends: BackendRegistry,
    /// Syncs pool leaves, through the shared leaves cache.
    synchronizer: LeafSynchronizer,
    /// The relayers, if any are configured.
    #[builder(default, setter(strip_option))]
    relayers: Option<RelayerManager>,
    /// Opens channels to relayers.
    connector: Arc<dyn RelayerConnector>,
    /// The proving capability.
    prover: Arc<dyn ProvingManager>,
    /// The proving key of the withdraw circuit.
    #[builder(setter(into))]
    proving_key: Arc<Vec<u8>>,
    /// The account self-submitting withdrawals.
    #[builder(default)]
    signer: Option<SignerIdentity>,
    /// The http client used to read relayer leaves caches.
    #[builder(default)]
    http: reqwest::Client,
}

/// A withdrawal kept after its relayer timed out, so it can be submitted
/// again without computing the proof again.
struct RetainedWithdrawal {
    call: WithdrawCall,
    backend: Arc<dyn WithdrawalBackend>,
}

/// Runs withdrawals, one at a time.
pub struct Withdrawer {
    config: WithdrawConfig,
    backends: BackendRegistry,
    synchronizer: LeafSynchronizer,
    relayers: Option<RelayerManager>,
    connector: Arc<dyn RelayerConnector>,
    orchestrator: ProofOrchestrator,
    reconciler: RootReconciler,
    submission: RelayedSubmission,
    hasher: PoseidonHasher,
    signer: Option<SignerIdentity>,
    http: reqwest::Client,
    state: Mutex<WithdrawState>,
    cancel_requested: AtomicBool,
    selected_relayer: Mutex<Option<RelayerCapabilities>>,
    retained: Mutex<Option<RetainedWithdrawal>>,
    events: broadcast::Sender<WithdrawEvent>,
}

impl std::fmt::Debug for Withdrawer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Withdrawer")
            .field("state", &*self.state.lock())
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl Withdrawer {
    /// Creates a withdrawer, in the [`WithdrawState::Ideal`] state.
    pub fn new(parts: WithdrawerParts) -> Self {
        let hasher = PoseidonHasher::new();
        let (events, _) = broadcast::channel(parts.config.events_capacity.max(1));
        let reconciler = RootReconciler::new(
            hasher.clone(),
            parts.config.reconcile.max_retries,
            parts.config.reconcile.retry_interval(),
        );
        let submission = RelayedSubmission::new(parts.config.relayer.timeout());
        let orchestrator = ProofOrchestrator::new(
            hasher.clone(),
            parts.prover,
            parts.proving_key,
        );
        Self {
            config: parts.config,
            backends: parts.backends,
            synchronizer: parts.synchronizer,
            relayers: parts.relayers,
            connector: parts.connector,
            orchestrator,
            reconciler,
            submission,
            hasher,
            signer: parts.signer,
            http: parts.http,
            state: Mutex::new(WithdrawState::Ideal),
            cancel_requested: AtomicBool::new(false),
            selected_relayer: Mutex::new(None),
            retained: Mutex::new(None),
            events,
        }
    }

    /// The current state.
    pub fn state(&self) -> WithdrawState {
        *self.state.lock()
    }

    /// Subscribes to the events of every following withdrawal.
    pub fn subscribe(&self) -> broadcast::Receiver<WithdrawEvent> {
        self.events.subscribe()
    }

    /// Picks the relayer of the next withdrawals, `None` to self-submit.
    pub fn set_relayer(&self, relayer: Option<RelayerCapabilities>) {
        *self.selected_relayer.lock() = relayer;
    }

    /// The relayer of the next withdrawals.
    pub fn relayer(&self) -> Option<RelayerCapabilities> {
        self.selected_relayer.lock().clone()
    }

    /// The relayers able to relay the withdrawal of `note`.
    pub async fn relayers_for_note(
        &self,
        note: &str,
    ) -> crate::Result<Vec<RelayerCapabilities>> {
        let note = Note::parse(note)?;
        let Some(relayers) = &self.relayers else {
            return Ok(Vec::new());
        };
        let address = self
            .config
            .resolve_pool(note.dest_chain_id(), note.token_symbol(), note.amount())
            .ok()
            .map(|pool| pool.address);
        let query = RelayerQuery {
            chain_id: note.dest_chain_id(),
            address,
            token_symbol: Some(note.token_symbol().to_owned()),
            amount: note.amount().parse().ok(),
        };
        Ok(relayers.discover(&query).await)
    }

    /// Asks the running withdrawal to stop before its transaction is sent.
    ///
    /// Only accepted while generating the proof. The proof computation is
    /// never interrupted: the withdrawal stops once it is done. Returns
    /// whether the request was accepted.
    pub fn cancel_withdraw(&self) -> bool {
        let state = self.state.lock();
        if *state != WithdrawState::GeneratingZk {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Withdraw,
            cancel_requested = true,
        );
        true
    }

    /// Withdraws `note` to `recipient`, returning once the withdrawal ended.
    ///
    /// Does nothing unless the withdrawer is [`WithdrawState::Ideal`].
    /// Invalid inputs are reported as [`WithdrawEvent::ValidationError`]
    /// without starting the withdrawal. Every other failure is reported as
    /// [`WithdrawEvent::Error`] and moves through [`WithdrawState::Failed`].
    #[tracing::instrument(skip_all)]
    pub async fn withdraw(
        &self,
        note: &str,
        recipient: &str,
    ) -> crate::Result<WithdrawOutcome> {
        if self.state() != WithdrawState::Ideal {
            tracing::debug!("A withdrawal is in progress, ignoring");
            return Ok(WithdrawOutcome::Ignored);
        }
        let note = self.validate(note, recipient)?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        if !self.begin(WithdrawState::Ideal, WithdrawState::GeneratingZk) {
            return Ok(WithdrawOutcome::Ignored);
        }
        if self.retained.lock().take().is_some() {
            tracing::debug!("Dropping the withdrawal kept from a timed out relayer");
        }
        match self.run(note, recipient).await {
            Ok(Some(tx)) => {
                self.finish(WithdrawState::Done);
                Ok(WithdrawOutcome::Done(tx))
            }
            Ok(None) => {
                tracing::info!("Withdrawal cancelled, the proof is discarded");
                self.emit(WithdrawEvent::Cancelled);
                self.set_state(WithdrawState::Ideal);
                Ok(WithdrawOutcome::Cancelled)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Self-submits the withdrawal kept after its relayer timed out.
    ///
    /// The proof was made for the relayer, which still receives the fee.
    pub async fn resubmit_directly(&self) -> crate::Result<WithdrawOutcome> {
        let Some(retained) = self.retained.lock().take() else {
            return Err(crate::Error::Generic("no withdrawal is retained"));
        };
        if !self.begin(WithdrawState::Ideal, WithdrawState::SendingTransaction)
        {
            *self.retained.lock() = Some(retained);
            return Ok(WithdrawOutcome::Ignored);
        }
        match self.submit_directly(&*retained.backend, &retained.call).await {
            Ok(tx) => {
                self.finish(WithdrawState::Done);
                Ok(WithdrawOutcome::Done(tx))
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Whether a withdrawal is kept for [`Withdrawer::resubmit_directly`].
    ///
    /// Starting a new withdrawal drops it.
    pub fn has_retained(&self) -> bool {
        self.retained.lock().is_some()
    }

    /// Drops the withdrawal kept after a relayer timeout.
    pub fn discard_retained(&self) -> bool {
        self.retained.lock().take().is_some()
    }

    fn validate(&self, note: &str, recipient: &str) -> crate::Result<Note> {
        let parsed = Note::parse(note);
        let account = match &parsed {
            Ok(note) => {
                native_account_bytes(note.dest_chain_id().family(), recipient)
            }
            // without a note, any account format will do
            Err(_) => native_account_bytes(ChainFamily::Evm, recipient)
                .or_else(|_| {
                    native_account_bytes(ChainFamily::Substrate, recipient)
                }),
        };
        let errors = ValidationErrors {
            note: validation_message(&parsed),
            recipient: validation_message(&account),
        };
        if !errors.is_empty() {
            tracing::debug!("Rejected withdraw inputs: {:?}", errors);
            self.emit(WithdrawEvent::ValidationError(errors));
        }
        match (parsed, account) {
            (Ok(note), Ok(_)) => Ok(note),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        }
    }

    async fn run(
        &self,
        note: Note,
        recipient: &str,
    ) -> crate::Result<Option<TxReference>> {
        let mut session = self.open_session(note, recipient)?;
        let dest = self.backends.get(session.dest_pool().chain_id)?;
        self.sync_leaves(&mut session, &dest).await?;
        self.negotiate_fee(&mut session, &dest).await?;
        if session.is_cross_chain() {
            self.reconcile_root(&mut session, &dest).await?;
        }
        self.prove(&mut session).await?;
        if !self.enter_sending() {
            return Ok(None);
        }
        self.submit(&session, dest).await.map(Some)
    }

    fn open_session(
        &self,
        note: Note,
        recipient: &str,
    ) -> crate::Result<WithdrawalSession> {
        let dest_pool = self.config.resolve_pool(
            note.dest_chain_id(),
            note.token_symbol(),
            note.amount(),
        )?;
        let source_pool = if note.is_cross_chain() {
            self.config.resolve_pool(
                note.source_chain_id(),
                note.token_symbol(),
                note.amount(),
            )?
        } else {
            dest_pool.clone()
        };
        let relayer = match self.relayer() {
            Some(capabilities) => Some(ActiveRelayer::bind(
                capabilities,
                dest_pool.clone(),
                self.connector.clone(),
            )?),
            None => None,
        };
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Withdraw,
            dest_pool = %dest_pool,
            source_pool = %source_pool,
            relayed = relayer.is_some(),
        );
        Ok(WithdrawalSession::new(
            note,
            recipient.to_owned(),
            dest_pool,
            source_pool,
            relayer,
        ))
    }

    async fn sync_leaves(
        &self,
        session: &mut WithdrawalSession,
        dest: &Arc<dyn WithdrawalBackend>,
    ) -> crate::Result<()> {
        let leaves = if session.is_cross_chain() {
            self.source_leaves(session).await?
        } else {
            self.synchronizer
                .fetch_leaves(&**dest, session.dest_pool())
                .await?
        };
        let commitment = session.note().leaf_commitment(&self.hasher)?;
        session.leaf_index = locate_leaf_index(&leaves, &commitment)?;
        session.leaves = leaves;
        Ok(())
    }

    /// Source chain leaves, from a relayer of the source chain when one
    /// serves the pool, from the source chain itself otherwise.
    ///
    /// Relayer served leaves are not cached, only the chain feeds the
    /// shared leaves cache.
    async fn source_leaves(
        &self,
        session: &WithdrawalSession,
    ) -> crate::Result<Vec<Leaf>> {
        let pool = session.source_pool();
        if let Some(relayers) = &self.relayers {
            if let Some(relayer) = relayers.random_for_pool(pool).await {
                let source = RelayerLeavesSource::new(
                    self.http.clone(),
                    relayer.endpoint.clone(),
                );
                match self.synchronizer.fetch_uncached(&source, pool).await {
                    Ok(leaves) => return Ok(leaves),
                    Err(e) => tracing::warn!(
                        "Relayer {} could not serve the leaves of {}: {}",
                        relayer,
                        pool,
                        e
                    ),
                }
            }
        }
        let source = self.backends.get(pool.chain_id)?;
        self.synchronizer.fetch_leaves(&*source, pool).await
    }

    async fn negotiate_fee(
        &self,
        session: &mut WithdrawalSession,
        dest: &Arc<dyn WithdrawalBackend>,
    ) -> crate::Result<()> {
        if let Some(relayer) = session.relayer() {
            let quote = relayer.fee_quote(&**dest).await?;
            session.fee = quote.total_fees;
        }
        Ok(())
    }

    async fn reconcile_root(
        &self,
        session: &mut WithdrawalSession,
        dest: &Arc<dyn WithdrawalBackend>,
    ) -> crate::Result<()> {
        let merkle = self
            .reconciler
            .reconcile(
                &**dest,
                session.dest_pool(),
                &session.leaves,
                session.leaf_index,
            )
            .await?;
        session.merkle = Some(merkle);
        Ok(())
    }

    async fn prove(&self, session: &mut WithdrawalSession) -> crate::Result<()> {
        let request = ProofRequest {
            note: session.note(),
            leaves: &session.leaves,
            leaf_index: session.leaf_index,
            merkle: session.merkle.as_ref(),
            family: session.dest_pool().chain_id.family(),
            recipient: session.recipient(),
            relayer: session.relayer().map(ActiveRelayer::beneficiary),
            fee: session.fee,
            refund: Default::default(),
        };
        let prepared = self.orchestrator.build_proof(request).await?;
        session.prepared = Some(prepared);
        Ok(())
    }

    async fn submit(
        &self,
        session: &WithdrawalSession,
        dest: Arc<dyn WithdrawalBackend>,
    ) -> crate::Result<TxReference> {
        let call = session.withdraw_call()?;
        let Some(relayer) = session.relayer() else {
            return self.submit_directly(&*dest, &call).await;
        };
        let command = RelayerCommand::withdraw(&call, session.is_cross_chain());
        let events = &self.events;
        let result = self
            .submission
            .submit(relayer, command, |result| {
                let _ = events.send(WithdrawEvent::Relayer(result.clone()));
            })
            .await;
        if let Err(crate::Error::RelayerTimeout { .. }) = &result {
            tracing::warn!(
                "Keeping the withdraw proof, it can be submitted directly"
            );
            *self.retained.lock() = Some(RetainedWithdrawal {
                call,
                backend: dest,
            });
        }
        result
    }

    async fn submit_directly(
        &self,
        backend: &dyn WithdrawalBackend,
        call: &WithdrawCall,
    ) -> crate::Result<TxReference> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(crate::Error::NoAccountAvailable)?;
        let events = self.events.clone();
        let notifier = TxNotifier::new(move |notification| {
            let _ = events.send(WithdrawEvent::Transaction(notification));
        });
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Withdraw,
            method = %call.method,
            pool = %call.pool,
            self_submitted = true,
        );
        backend.submit(call, signer, &notifier).await.map_err(|e| match e {
            crate::Error::SubmissionRejected(_)
            | crate::Error::SubmissionFailed(_) => e,
            e => crate::Error::SubmissionFailed(e.to_string()),
        })
    }

    fn emit(&self, event: WithdrawEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: WithdrawState) {
        *self.state.lock() = next;
        self.announce(next);
    }

    fn announce(&self, state: WithdrawState) {
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Lifecycle,
            state = %state,
        );
        self.emit(WithdrawEvent::StateChange(state));
    }

    /// Moves from `from` to `to`, unless the state is not `from`.
    fn begin(&self, from: WithdrawState, to: WithdrawState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.announce(to);
        true
    }

    /// Moves to sending the transaction, unless a cancel was requested.
    fn enter_sending(&self) -> bool {
        {
            let mut state = self.state.lock();
            if self.cancel_requested.swap(false, Ordering::SeqCst) {
                return false;
            }
            *state = WithdrawState::SendingTransaction;
        }
        self.announce(WithdrawState::SendingTransaction);
        true
    }

    fn finish(&self, terminal: WithdrawState) {
        self.set_state(terminal);
        self.set_state(WithdrawState::Ideal);
    }

    fn fail(&self, error: &crate::Error) {
        tracing::error!("Withdrawal failed: {}", error);
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Withdraw,
            failed = true,
            retryable = error.is_retryable(),
            error = %error,
        );
        self.emit(WithdrawEvent::Error(error.to_string()));
        self.finish(WithdrawState::Failed);
    }
}

/// The message of an input error, `None` for valid inputs and for failures
/// that are not about the input itself.
fn validation_message<T>(result: &crate::Result<T>) -> Option<String> {
    match result {
        Err(e) if e.is_validation() => Some(e.to_string()),
        _ => None,
    }
}
