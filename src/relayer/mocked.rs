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
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::protocol::{CommandResponse, RelayerCommand};
use super::registry::RelayerInfoSource;
use super::transport::{RelayerChannel, RelayerConnector};
use super::RelayerCapabilities;

/// Connects to a relayer that answers every connection with the same
/// scripted frames.
///
/// Frames are kept as JSON text and decoded when read, like frames of a
/// websocket channel.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    frames: Vec<String>,
    hang: bool,
    unreachable: bool,
    sent: Arc<Mutex<Vec<RelayerCommand>>>,
}

impl ScriptedConnector {
    /// A relayer sending `frames` then closing the channel.
    pub fn new(frames: Vec<CommandResponse>) -> Self {
        Self::text(encode(&frames))
    }

    /// A relayer sending the raw text `frames` then closing the channel.
    pub fn text(frames: Vec<String>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// A relayer sending `frames` then going silent.
    pub fn hanging(frames: Vec<CommandResponse>) -> Self {
        Self {
            frames: encode(&frames),
            hang: true,
            ..Default::default()
        }
    }

    /// A relayer that cannot be connected to.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    /// Every command sent to the relayer.
    pub fn sent(&self) -> Vec<RelayerCommand> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl RelayerConnector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &Url,
    ) -> crate::Result<Box<dyn RelayerChannel>> {
        if self.unreachable {
            return Err(crate::Error::RelayerUnavailable(format!(
                "connection to {endpoint} refused"
            )));
        }
        Ok(Box::new(ScriptedChannel {
            frames: self.frames.iter().cloned().collect(),
            hang: self.hang,
            sent: self.sent.clone(),
        }))
    }
}

fn encode(frames: &[CommandResponse]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|frame| serde_json::to_string(frame).ok())
        .collect()
}

struct ScriptedChannel {
    frames: VecDeque<String>,
    hang: bool,
    sent: Arc<Mutex<Vec<RelayerCommand>>>,
}

#[async_trait::async_trait]
impl RelayerChannel for ScriptedChannel {
    async fn send(&mut self, command: &RelayerCommand) -> crate::Result<()> {
        self.sent.lock().push(command.clone());
        Ok(())
    }

    async fn next_response(
        &mut self,
    ) -> Option<crate::Result<CommandResponse>> {
        match self.frames.pop_front() {
            Some(frame) => Some(serde_json::from_str(&frame).map_err(Into::into)),
            None if self.hang => futures::future::pending().await,
            None => None,
        }
    }
}

/// Relayer capabilities known up front. Endpoints it does not know are
/// unreachable.
#[derive(Debug, Clone, Default)]
pub struct StaticRelayerInfoSource {
    relayers: HashMap<Url, RelayerCapabilities>,
}

impl StaticRelayerInfoSource {
    /// Adds a relayer.
    pub fn with(mut self, capabilities: RelayerCapabilities) -> Self {
        self.relayers
            .insert(capabilities.endpoint.clone(), capabilities);
        self
    }
}

#[async_trait::async_trait]
impl RelayerInfoSource for StaticRelayerInfoSource {
    async fn fetch_capabilities(
        &self,
        endpoint: &Url,
    ) -> crate::Result<RelayerCapabilities> {
        self.relayers.get(endpoint).cloned().ok_or_else(|| {
            crate::Error::RelayerUnavailable(format!(
                "{endpoint} is not reachable"
            ))
        })
    }
}
