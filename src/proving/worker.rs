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
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};

use super::{ProvingInput, ProvingManager, ZkProof};

/// A blocking prover, like a native circuit implementation.
pub trait CircuitProver: Send + 'static {
    /// Computes the proof of `input`, blocking the calling thread.
    fn prove(&mut self, input: &ProvingInput) -> crate::Result<ZkProof>;
}

impl<F> CircuitProver for F
where
    F: FnMut(&ProvingInput) -> crate::Result<ZkProof> + Send + 'static,
{
    fn prove(&mut self, input: &ProvingInput) -> crate::Result<ZkProof> {
        self(input)
    }
}

struct Job {
    input: ProvingInput,
    reply: oneshot::Sender<crate::Result<ZkProof>>,
}

/// Runs a [`CircuitProver`] on a dedicated thread, one proof at a time.
///
/// The thread stops once every handle to the worker is dropped.
#[derive(Debug, Clone)]
pub struct ProvingWorker {
    jobs: mpsc::Sender<Job>,
}

impl ProvingWorker {
    /// Starts the proving thread.
    pub fn spawn<P: CircuitProver>(mut prover: P) -> crate::Result<Self> {
        let (jobs, mut rx) = mpsc::channel::<Job>(1);
        std::thread::Builder::new()
            .name("webb-proving".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let result =
                        catch_unwind(AssertUnwindSafe(|| prover.prove(&job.input)))
                            .unwrap_or_else(|_| {
                                tracing::error!("Prover panicked");
                                Err(crate::Error::ProofGenerationFailed(
                                    "prover panicked".into(),
                                ))
                            });
                    // the caller may have gone away
                    let _ = job.reply.send(result);
                }
                tracing::debug!("Proving worker stopped");
            })?;
        Ok(Self { jobs })
    }
}

#[async_trait::async_trait]
impl ProvingManager for ProvingWorker {
    async fn compute(&self, input: ProvingInput) -> crate::Result<ZkProof> {
        let (reply, rx) = oneshot::channel();
        self.jobs.send(Job { input, reply }).await.map_err(|_| {
            crate::Error::ProofGenerationFailed(
                "proving worker is not running".into(),
            )
        })?;
        rx.await.map_err(|_| {
            crate::Error::ProofGenerationFailed(
                "proving worker dropped the request".into(),
            )
        })?
    }
}
