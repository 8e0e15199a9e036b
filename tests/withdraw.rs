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
//! End to end withdrawals against in memory chains, relayers and provers.
use std::sync::Arc;

use ethereum_types::{H256, U256};
use tokio::sync::{broadcast, Notify};
use url::Url;

use webb_withdraw::backend::mocked::{MockedChain, SubmitOutcome};
use webb_withdraw::backend::{BackendRegistry, TxNotification};
use webb_withdraw::config::{PoolConfig, WithdrawConfig};
use webb_withdraw::leaves::LeafSynchronizer;
use webb_withdraw::merkle::PoseidonHasher;
use webb_withdraw::note::{Backend, Curve, Note};
use webb_withdraw::proving::mocked::MockedProver;
use webb_withdraw::relayer::mocked::{
    ScriptedConnector, StaticRelayerInfoSource,
};
use webb_withdraw::relayer::protocol::{
    CommandResponse, NetworkStatus, RelayCommand, RelayerCommand,
    RelayedWithdrawResult, WithdrawStatus,
};
use webb_withdraw::relayer::registry::RelayerManager;
use webb_withdraw::relayer::{
    RelayerCapabilities, SupportedChain, SupportedContract,
};
use webb_withdraw::store::mem::InMemoryLeafCache;
use webb_withdraw::types::{
    ChainFamily, PoolId, SignerIdentity, TxReference, TypedChainId,
};
use webb_withdraw::withdraw::{
    WithdrawEvent, WithdrawOutcome, WithdrawState, Withdrawer, WithdrawerParts,
};
use webb_withdraw::Error;

const HERMES: TypedChainId = TypedChainId::Evm(5001);
const ATHENA: TypedChainId = TypedChainId::Evm(5002);
const POOL_ADDRESS: &str = "0xd24260c102b5d128cbefa0f655e5be3c2370677c";
const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";
const BENEFICIARY: &str = "0x58fcd47ece3ed5d74ac38d1f0dc0ea5ed7b5bd4c";
const RELAYER_URL: &str = "http://localhost:9955";

fn pool(chain: TypedChainId) -> PoolId {
    PoolId::new(chain, POOL_ADDRESS)
}

fn config() -> WithdrawConfig {
    let mut config = WithdrawConfig::default();
    config.reconcile.max_retries = 1;
    config.reconcile.retry_interval_ms = 10;
    config.relayer.timeout = 5;
    config.pools = [HERMES, ATHENA]
        .into_iter()
        .map(|chain| PoolConfig {
            chain,
            token_symbol: "WEBB".into(),
            amount: "1".into(),
            address: POOL_ADDRESS.into(),
            deployed_at: 0,
            denomination: None,
        })
        .collect();
    config
}

fn note(source: TypedChainId, dest: TypedChainId, seed: u8) -> Note {
    Note::new(
        Backend::Circom,
        Curve::Bn254,
        source,
        dest,
        "WEBB",
        18,
        "1",
        H256::repeat_byte(seed),
        H256::repeat_byte(seed.wrapping_add(1)),
    )
    .unwrap()
}

fn relayer(fee: f64) -> RelayerCapabilities {
    RelayerCapabilities {
        endpoint: Url::parse(RELAYER_URL).unwrap(),
        chains: vec![SupportedChain {
            chain_id: HERMES,
            beneficiary: Some(BENEFICIARY.into()),
            contracts: vec![SupportedContract {
                address: POOL_ADDRESS.into(),
                size: Some(1.0),
                token_symbol: Some("WEBB".into()),
                withdraw_fee_percentage: fee,
            }],
        }],
    }
}

/// Two chains, a relayer and a prover, all in memory.
struct Harness {
    hermes: Arc<MockedChain>,
    athena: Arc<MockedChain>,
    connector: Arc<ScriptedConnector>,
    prover: Arc<MockedProver>,
    withdrawer: Withdrawer,
}

struct HarnessBuilder {
    config: WithdrawConfig,
    connector: ScriptedConnector,
    prover: MockedProver,
    signer: Option<SignerIdentity>,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            config: config(),
            connector: ScriptedConnector::default(),
            prover: MockedProver::new(),
            signer: Some(SignerIdentity("alice".into())),
        }
    }

    fn relayer_frames(mut self, connector: ScriptedConnector) -> Self {
        self.connector = connector;
        self
    }

    fn prover(mut self, prover: MockedProver) -> Self {
        self.prover = prover;
        self
    }

    fn without_signer(mut self) -> Self {
        self.signer = None;
        self
    }

    fn build(self) -> Harness {
        let hermes = Arc::new(MockedChain::new(ChainFamily::Evm));
        let athena = Arc::new(MockedChain::new(ChainFamily::Evm));
        hermes.set_denomination(&pool(HERMES), U256::exp10(18));
        let mut backends = BackendRegistry::default();
        backends.register(HERMES, hermes.clone()).unwrap();
        backends.register(ATHENA, athena.clone()).unwrap();
        let connector = Arc::new(self.connector);
        let prover = Arc::new(self.prover);
        let relayers = RelayerManager::new(
            vec![Url::parse(RELAYER_URL).unwrap()],
            Arc::new(StaticRelayerInfoSource::default().with(relayer(0.05))),
        );
        let parts = WithdrawerParts::builder()
            .config(self.config)
            .backends(backends)
            .synchronizer(LeafSynchronizer::new(
                Arc::new(InMemoryLeafCache::default()),
                4,
            ))
            .relayers(relayers)
            .connector(connector.clone())
            .prover(prover.clone())
            .proving_key(vec![0u8; 8])
            .signer(self.signer)
            .build();
        Harness {
            hermes,
            athena,
            connector,
            prover,
            withdrawer: Withdrawer::new(parts),
        }
    }
}

impl Harness {
    /// Deposits `note` in its source pool, after a few other deposits.
    fn deposit(&self, note: &Note) {
        let chain = if note.source_chain_id() == HERMES {
            &self.hermes
        } else {
            &self.athena
        };
        let pool = pool(note.source_chain_id());
        for i in 0..5u64 {
            chain.deposit(&pool, H256::from_low_u64_be(1000 + i));
        }
        let commitment =
            note.leaf_commitment(&PoseidonHasher::new()).unwrap();
        chain.deposit(&pool, commitment);
    }
}

fn drain(rx: &mut broadcast::Receiver<WithdrawEvent>) -> Vec<WithdrawEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[WithdrawEvent]) -> Vec<WithdrawState> {
    events
        .iter()
        .filter_map(|e| match e {
            WithdrawEvent::StateChange(s) => Some(*s),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn self_submitted_withdrawal_is_done() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    let note = note(HERMES, HERMES, 1);
    harness.deposit(&note);
    let mut rx = harness.withdrawer.subscribe();

    let outcome = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await?;
    let WithdrawOutcome::Done(TxReference(tx)) = &outcome else {
        anyhow::bail!("unexpected outcome {:?}", outcome);
    };
    assert!(!tx.is_empty());
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);

    let submitted = harness.hermes.submitted();
    assert_eq!(submitted.len(), 1);
    let call = &submitted[0];
    assert_eq!(call.recipient, RECIPIENT);
    assert_eq!(call.relayer, RECIPIENT);
    assert!(call.fee.is_zero());
    assert!(call.refund.is_zero());
    assert_eq!(call.root, harness.hermes.tree_root(&pool(HERMES))?);

    let input = harness.prover.last_input().expect("the prover was called");
    assert_eq!(input.merkle.leaf_index, 5);
    assert_eq!(input.chain_id, HERMES.chain_id());

    let events = drain(&mut rx);
    assert_eq!(
        states(&events),
        vec![
            WithdrawState::GeneratingZk,
            WithdrawState::SendingTransaction,
            WithdrawState::Done,
            WithdrawState::Ideal,
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        WithdrawEvent::Transaction(TxNotification::Finalize { .. })
    )));
    Ok(())
}

#[tokio::test]
async fn relayed_withdrawal_pays_the_relayer() -> anyhow::Result<()> {
    let tx_hash = H256::repeat_byte(7);
    let harness = HarnessBuilder::new()
        .relayer_frames(ScriptedConnector::new(vec![
            CommandResponse::Network(NetworkStatus::Connected),
            CommandResponse::Withdraw(WithdrawStatus::Sent),
            CommandResponse::Withdraw(WithdrawStatus::Submitted { tx_hash }),
            CommandResponse::Withdraw(WithdrawStatus::Finalized { tx_hash }),
        ]))
        .build();
    let note = note(HERMES, HERMES, 3);
    harness.deposit(&note);
    let relayers = harness
        .withdrawer
        .relayers_for_note(&note.serialize())
        .await?;
    assert_eq!(relayers.len(), 1);
    harness.withdrawer.set_relayer(relayers.into_iter().next());
    let mut rx = harness.withdrawer.subscribe();

    let outcome = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await?;
    assert_eq!(
        outcome,
        WithdrawOutcome::Done(TxReference(format!("{tx_hash:?}")))
    );
    // nothing was self-submitted
    assert!(harness.hermes.submitted().is_empty());

    let sent = harness.connector.sent();
    assert_eq!(sent.len(), 1);
    let RelayerCommand::Evm(RelayCommand::MixerRelayTx(tx)) = &sent[0] else {
        anyhow::bail!("unexpected command {:?}", sent[0]);
    };
    assert_eq!(tx.relayer, BENEFICIARY);
    assert_eq!(tx.recipient, RECIPIENT);
    assert_eq!(tx.fee, U256::from(5u64) * U256::exp10(16));

    let relayed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WithdrawEvent::Relayer(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(relayed.first(), Some(&RelayedWithdrawResult::PreFlight));
    assert!(relayed.last().map_or(false, |r| r.is_terminal()));
    Ok(())
}

#[tokio::test]
async fn relayer_errors_fail_the_withdrawal() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new()
        .relayer_frames(ScriptedConnector::new(vec![
            CommandResponse::Withdraw(WithdrawStatus::Sent),
            CommandResponse::Withdraw(WithdrawStatus::Errored {
                code: 0,
                reason: "insufficient relayer balance".into(),
            }),
        ]))
        .build();
    let note = note(HERMES, HERMES, 5);
    harness.deposit(&note);
    harness.withdrawer.set_relayer(Some(relayer(0.01)));
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RelayerErrored(_)));
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);

    let events = drain(&mut rx);
    assert!(events.contains(&WithdrawEvent::Error(
        "insufficient relayer balance".into()
    )));
    assert!(states(&events)
        .ends_with(&[WithdrawState::Failed, WithdrawState::Ideal]));
    assert!(!states(&events).contains(&WithdrawState::Done));
    // the withdrawer is reusable
    harness.withdrawer.set_relayer(None);
    let outcome = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await?;
    assert!(matches!(outcome, WithdrawOutcome::Done(_)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timed_out_relayers_leave_a_withdrawal_to_resubmit(
) -> anyhow::Result<()> {
    let harness = HarnessBuilder::new()
        .relayer_frames(ScriptedConnector::hanging(vec![
            CommandResponse::Withdraw(WithdrawStatus::Sent),
        ]))
        .build();
    let note = note(HERMES, HERMES, 7);
    harness.deposit(&note);
    harness.withdrawer.set_relayer(Some(relayer(0.01)));

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RelayerTimeout { .. }));
    assert!(err.is_retryable());
    assert!(harness.withdrawer.has_retained());
    assert_eq!(harness.prover.calls(), 1);

    let outcome = harness.withdrawer.resubmit_directly().await?;
    assert!(matches!(outcome, WithdrawOutcome::Done(_)));
    assert!(!harness.withdrawer.has_retained());
    // same proof, still paying the relayer
    assert_eq!(harness.prover.calls(), 1);
    let submitted = harness.hermes.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].relayer, BENEFICIARY);
    Ok(())
}

#[tokio::test]
async fn cross_chain_withdrawal_uses_a_neighbor_root() -> anyhow::Result<()>
{
    let harness = HarnessBuilder::new().build();
    let note = note(ATHENA, HERMES, 9);
    harness.deposit(&note);
    let source_root = harness.athena.tree_root(&pool(ATHENA))?;
    harness.hermes.set_neighbor_roots(
        &pool(HERMES),
        vec![H256::repeat_byte(0xaa), source_root],
    );

    let outcome = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await?;
    assert!(matches!(outcome, WithdrawOutcome::Done(_)));
    let submitted = harness.hermes.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].root, source_root);
    assert!(harness.athena.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn cross_chain_stale_roots_fail_back_to_ideal() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    let note = note(ATHENA, HERMES, 11);
    harness.deposit(&note);
    harness
        .hermes
        .set_neighbor_roots(&pool(HERMES), vec![H256::repeat_byte(0xbb)]);
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleRoot { .. }));
    assert_eq!(harness.prover.calls(), 0);
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);
    assert!(states(&drain(&mut rx))
        .ends_with(&[WithdrawState::Failed, WithdrawState::Ideal]));
    Ok(())
}

#[tokio::test]
async fn cancelled_withdrawals_send_nothing() -> anyhow::Result<()> {
    let gate = Arc::new(Notify::new());
    let harness = HarnessBuilder::new()
        .prover(MockedProver::gated(gate.clone()))
        .build();
    let note = note(HERMES, HERMES, 13);
    harness.deposit(&note);
    let entered = harness.prover.entered();
    let mut rx = harness.withdrawer.subscribe();
    assert!(!harness.withdrawer.cancel_withdraw());

    let raw = note.serialize();
    let withdraw = harness.withdrawer.withdraw(&raw, RECIPIENT);
    let cancel = async {
        entered.notified().await;
        assert_eq!(harness.withdrawer.state(), WithdrawState::GeneratingZk);
        // a second withdrawal is ignored while one is running
        let ignored = harness.withdrawer.withdraw(&raw, RECIPIENT).await;
        assert!(matches!(ignored, Ok(WithdrawOutcome::Ignored)));
        let accepted = harness.withdrawer.cancel_withdraw();
        gate.notify_one();
        accepted
    };
    let (outcome, accepted) = tokio::join!(withdraw, cancel);
    assert!(accepted);
    assert_eq!(outcome?, WithdrawOutcome::Cancelled);
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);
    assert!(harness.hermes.submitted().is_empty());

    let events = drain(&mut rx);
    assert!(events.contains(&WithdrawEvent::Cancelled));
    assert!(!states(&events).contains(&WithdrawState::SendingTransaction));
    assert!(!states(&events).contains(&WithdrawState::Done));
    Ok(())
}

#[tokio::test]
async fn invalid_inputs_are_reported_before_starting() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw("webb://not-a-note", RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedNote(_)));

    let note = note(HERMES, HERMES, 15);
    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), "0x1234")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAccount { .. }));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    let WithdrawEvent::ValidationError(first) = &events[0] else {
        anyhow::bail!("unexpected event {:?}", events[0]);
    };
    assert!(first.note.is_some());
    assert!(first.recipient.is_none());
    let WithdrawEvent::ValidationError(second) = &events[1] else {
        anyhow::bail!("unexpected event {:?}", events[1]);
    };
    assert!(second.note.is_none());
    assert!(second.recipient.is_some());
    assert_eq!(harness.prover.calls(), 0);
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);
    Ok(())
}

#[tokio::test]
async fn notes_of_other_pools_are_not_found() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    let deposited = note(HERMES, HERMES, 17);
    harness.deposit(&deposited);
    let stranger = note(HERMES, HERMES, 19);

    let err = harness
        .withdrawer
        .withdraw(&stranger.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LeafNotFound { .. }));
    assert_eq!(harness.prover.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn self_submission_needs_an_account() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().without_signer().build();
    let note = note(HERMES, HERMES, 21);
    harness.deposit(&note);

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAccountAvailable));
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);
    Ok(())
}

#[tokio::test]
async fn cancelling_while_sending_has_no_effect() -> anyhow::Result<()> {
    let gate = Arc::new(Notify::new());
    let harness = HarnessBuilder::new().build();
    harness.hermes.set_submit_gate(gate.clone());
    let entered = harness.hermes.submit_entered();
    let note = note(HERMES, HERMES, 23);
    harness.deposit(&note);
    let mut rx = harness.withdrawer.subscribe();

    let raw = note.serialize();
    let withdraw = harness.withdrawer.withdraw(&raw, RECIPIENT);
    let cancel = async {
        entered.notified().await;
        assert_eq!(
            harness.withdrawer.state(),
            WithdrawState::SendingTransaction
        );
        let accepted = harness.withdrawer.cancel_withdraw();
        gate.notify_one();
        accepted
    };
    let (outcome, accepted) = tokio::join!(withdraw, cancel);
    assert!(!accepted);
    assert!(matches!(outcome?, WithdrawOutcome::Done(_)));
    assert_eq!(harness.hermes.submitted().len(), 1);

    let events = drain(&mut rx);
    assert!(!events.contains(&WithdrawEvent::Cancelled));
    assert!(states(&events)
        .ends_with(&[WithdrawState::Done, WithdrawState::Ideal]));
    Ok(())
}

#[tokio::test]
async fn declined_signatures_reject_the_withdrawal() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    harness.hermes.set_submit_outcome(SubmitOutcome::Reject);
    let note = note(HERMES, HERMES, 25);
    harness.deposit(&note);
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SubmissionRejected(_)));
    assert!(!err.is_retryable());
    assert!(harness.hermes.submitted().is_empty());
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);

    let events = drain(&mut rx);
    assert!(events.contains(&WithdrawEvent::Error(
        "Withdraw rejected: user rejected the request".into()
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        WithdrawEvent::Transaction(TxNotification::Failed { reason, .. })
            if reason == "user rejected the request"
    )));
    assert!(states(&events).ends_with(&[
        WithdrawState::SendingTransaction,
        WithdrawState::Failed,
        WithdrawState::Ideal,
    ]));
    Ok(())
}

#[tokio::test]
async fn chain_rejections_fail_the_withdrawal() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    harness.hermes.set_submit_outcome(SubmitOutcome::Fail(
        "nullifier already spent".into(),
    ));
    let note = note(HERMES, HERMES, 27);
    harness.deposit(&note);
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SubmissionFailed(_)));

    let events = drain(&mut rx);
    assert!(events.contains(&WithdrawEvent::Error(
        "Withdraw failed: nullifier already spent".into()
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        WithdrawEvent::Transaction(TxNotification::Failed { reason, .. })
            if reason == "nullifier already spent"
    )));
    assert!(states(&events).ends_with(&[
        WithdrawState::SendingTransaction,
        WithdrawState::Failed,
        WithdrawState::Ideal,
    ]));

    harness.hermes.set_submit_outcome(SubmitOutcome::Finalize);
    let outcome = harness
        .withdrawer
        .withdraw(&note.serialize(), RECIPIENT)
        .await?;
    assert!(matches!(outcome, WithdrawOutcome::Done(_)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn new_withdrawals_drop_the_retained_one() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new()
        .relayer_frames(ScriptedConnector::hanging(vec![
            CommandResponse::Withdraw(WithdrawStatus::Sent),
        ]))
        .build();
    let timed_out = note(HERMES, HERMES, 29);
    harness.deposit(&timed_out);
    harness.withdrawer.set_relayer(Some(relayer(0.01)));
    let err = harness
        .withdrawer
        .withdraw(&timed_out.serialize(), RECIPIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RelayerTimeout { .. }));
    assert!(harness.withdrawer.has_retained());

    harness.withdrawer.set_relayer(None);
    let next = note(HERMES, HERMES, 31);
    harness.deposit(&next);
    let outcome = harness
        .withdrawer
        .withdraw(&next.serialize(), RECIPIENT)
        .await?;
    assert!(matches!(outcome, WithdrawOutcome::Done(_)));
    assert!(!harness.withdrawer.has_retained());
    assert!(harness.withdrawer.resubmit_directly().await.is_err());

    // only the new withdrawal was submitted, without a relayer fee
    let submitted = harness.hermes.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].relayer, RECIPIENT);
    assert!(submitted[0].fee.is_zero());
    Ok(())
}

#[tokio::test]
async fn every_invalid_input_is_reported_at_once() -> anyhow::Result<()> {
    let harness = HarnessBuilder::new().build();
    let mut rx = harness.withdrawer.subscribe();

    let err = harness
        .withdrawer
        .withdraw("webb://not-a-note", "nobody")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let WithdrawEvent::ValidationError(errors) = &events[0] else {
        anyhow::bail!("unexpected event {:?}", events[0]);
    };
    assert!(errors
        .note
        .as_deref()
        .map_or(false, |e| e.starts_with("Malformed note")));
    assert!(errors
        .recipient
        .as_deref()
        .map_or(false, |e| e.starts_with("Invalid account nobody")));
    assert_eq!(harness.withdrawer.state(), WithdrawState::Ideal);
    Ok(())
}
