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
use std::sync::Arc;

use url::Url;

use crate::backend::BackendRegistry;
use crate::config::WithdrawConfig;
use crate::leaves::LeafSynchronizer;
use crate::proving::ProvingManager;
use crate::relayer::leaves::RelayerLeavesSource;
use crate::relayer::registry::{HttpRelayerInfoSource, RelayerManager};
use crate::relayer::transport::{RelayerConnector, WsRelayerConnector};
use crate::store::LeafCacheStore;
use crate::types::SignerIdentity;
use crate::withdraw::{Withdrawer, WithdrawerParts};

/// What every withdrawal shares: the configuration, the leaves cache and
/// the connections to relayers.
#[derive(Clone)]
pub struct WithdrawContext {
    /// The loaded configuration.
    pub config: WithdrawConfig,
    store: Arc<dyn LeafCacheStore>,
    http: reqwest::Client,
    connector: Arc<dyn RelayerConnector>,
}

impl WithdrawContext {
    /// A context over `store`, talking to relayers over websockets.
    pub fn new(config: WithdrawConfig, store: Arc<dyn LeafCacheStore>) -> Self {
        Self::with_connector(config, store, Arc::new(WsRelayerConnector))
    }

    /// A context opening relayer channels with `connector`.
    pub fn with_connector(
        config: WithdrawConfig,
        store: Arc<dyn LeafCacheStore>,
        connector: Arc<dyn RelayerConnector>,
    ) -> Self {
        Self {
            config,
            store,
            http: reqwest::Client::new(),
            connector,
        }
    }

    /// The shared leaves cache.
    pub fn store(&self) -> Arc<dyn LeafCacheStore> {
        self.store.clone()
    }

    /// A synchronizer paging leaves as configured.
    pub fn synchronizer(&self) -> LeafSynchronizer {
        LeafSynchronizer::new(self.store.clone(), self.config.leaves.page_size)
    }

    /// The configured relayers, read over http.
    pub fn relayer_manager(&self) -> RelayerManager {
        RelayerManager::new(
            self.config.relayer.endpoints.clone(),
            Arc::new(HttpRelayerInfoSource::new(self.http.clone())),
        )
    }

    /// The backends of the chains in the configuration.
    pub fn backends(&self) -> crate::Result<BackendRegistry> {
        BackendRegistry::from_config(&self.config, self.http.clone())
    }

    /// Reads pool leaves from the leaves cache of the relayer at `endpoint`.
    pub fn relayer_leaves_source(&self, endpoint: Url) -> RelayerLeavesSource {
        RelayerLeavesSource::new(self.http.clone(), endpoint)
    }

    /// A withdrawer over the given chains and proving capability.
    pub fn withdrawer(
        &self,
        backends: BackendRegistry,
        prover: Arc<dyn ProvingManager>,
        proving_key: Vec<u8>,
        signer: Option<SignerIdentity>,
    ) -> Withdrawer {
        let parts = WithdrawerParts::builder()
            .config(self.config.clone())
            .backends(backends)
            .synchronizer(self.synchronizer())
            .relayers(self.relayer_manager())
            .connector(self.connector.clone())
            .prover(prover)
            .proving_key(proving_key)
            .signer(signer)
            .http(self.http.clone())
            .build();
        Withdrawer::new(parts)
    }
}
