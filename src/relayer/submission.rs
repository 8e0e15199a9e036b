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
use std::time::Duration;

use futures::prelude::*;

use super::protocol::{
    RelayedWithdrawResult, RelayedWithdrawWatcher, RelayerCommand,
};
use super::transport::RelayerChannel;
use super::ActiveRelayer;
use crate::types::TxReference;

/// Default time a relayer gets to finish a withdrawal.
pub const DEFAULT_RELAYER_TIMEOUT: Duration = Duration::from_secs(60);

/// The results of a relayed withdrawal, read from `channel` until the
/// withdrawal ends or the channel closes.
pub fn watch(
    mut channel: Box<dyn RelayerChannel>,
) -> impl Stream<Item = crate::Result<RelayedWithdrawResult>> + Send {
    async_stream::try_stream! {
        let mut watcher = RelayedWithdrawWatcher::new();
        while let Some(frame) = channel.next_response().await {
            let frame = match frame {
                // newer relayers may send statuses we do not know about
                Err(crate::Error::Json(e)) => {
                    tracing::warn!("Skipping undecodable relayer frame: {}", e);
                    continue;
                }
                frame => frame.map_err(|e| {
                    crate::Error::RelayerUnavailable(e.to_string())
                })?,
            };
            for result in watcher.advance(frame) {
                yield result;
            }
            if watcher.is_closed() {
                break;
            }
        }
    }
}

/// Sends withdraw requests to relayers and follows them to the end.
#[derive(Debug, Clone, Copy)]
pub struct RelayedSubmission {
    timeout: Duration,
}

impl Default for RelayedSubmission {
    fn default() -> Self {
        Self::new(DEFAULT_RELAYER_TIMEOUT)
    }
}

impl RelayedSubmission {
    /// A handler giving relayers `timeout` to finish.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Sends `command` to the relayer and waits for the withdrawal to end,
    /// reporting every result to `on_result`.
    ///
    /// Fails with [`crate::Error::RelayerTimeout`] when no terminal result
    /// arrives in time, and with [`crate::Error::RelayerErrored`] carrying
    /// the relayer's message when the relayer reports an error.
    #[tracing::instrument(
        skip(self, relayer, command, on_result),
        fields(relayer = %relayer.endpoint())
    )]
    pub async fn submit<F>(
        &self,
        relayer: &ActiveRelayer,
        command: RelayerCommand,
        mut on_result: F,
    ) -> crate::Result<TxReference>
    where
        F: FnMut(&RelayedWithdrawResult) + Send,
    {
        let relay = async {
            let mut channel = relayer.open_channel().await?;
            channel.send(&command).await.map_err(|e| {
                crate::Error::RelayerUnavailable(e.to_string())
            })?;
            let results = watch(channel);
            futures::pin_mut!(results);
            while let Some(result) = results.next().await {
                let result = result?;
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %crate::probe::Kind::RelayTx,
                    relayer = %relayer.endpoint(),
                    result = ?result,
                );
                on_result(&result);
                match result {
                    RelayedWithdrawResult::CleanExit(tx) => return Ok(tx),
                    RelayedWithdrawResult::Errored(reason) => {
                        return Err(crate::Error::RelayerErrored(reason))
                    }
                    _ => {}
                }
            }
            Err(crate::Error::RelayerUnavailable(
                "relayer closed the channel before the withdrawal ended".into(),
            ))
        };
        match tokio::time::timeout(self.timeout, relay).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Relayer {} did not finish the withdrawal in {:?}",
                    relayer.endpoint(),
                    self.timeout
                );
                Err(crate::Error::RelayerTimeout {
                    endpoint: relayer.endpoint().to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}
