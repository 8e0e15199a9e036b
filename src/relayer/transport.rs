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
use futures::prelude::*;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::{CommandResponse, RelayerCommand};

/// A duplex channel to a relayer.
#[async_trait::async_trait]
pub trait RelayerChannel: Send {
    /// Sends a command.
    async fn send(&mut self, command: &RelayerCommand) -> crate::Result<()>;

    /// The next frame from the relayer, `None` once the channel is closed.
    async fn next_response(
        &mut self,
    ) -> Option<crate::Result<CommandResponse>>;
}

/// Opens channels to relayers.
#[async_trait::async_trait]
pub trait RelayerConnector: Send + Sync {
    /// Opens a channel to the relayer at `endpoint`.
    async fn connect(
        &self,
        endpoint: &Url,
    ) -> crate::Result<Box<dyn RelayerChannel>>;
}

/// The websocket url of a relayer, `ws(s)://<host>/ws`.
pub fn websocket_url(endpoint: &Url) -> crate::Result<Url> {
    let mut url = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => {
            return Err(crate::Error::Generic(
                "relayer endpoint must be an http(s) or ws(s) url",
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| crate::Error::Generic("invalid relayer endpoint"))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}

/// Connects to relayers over websockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsRelayerConnector;

#[async_trait::async_trait]
impl RelayerConnector for WsRelayerConnector {
    #[tracing::instrument(skip(self), fields(endpoint = %endpoint))]
    async fn connect(
        &self,
        endpoint: &Url,
    ) -> crate::Result<Box<dyn RelayerChannel>> {
        let url = websocket_url(endpoint)?;
        tracing::debug!("Connecting to relayer at {}", url);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| crate::Error::RelayerUnavailable(e.to_string()))?;
        Ok(Box::new(WsRelayerChannel { stream }))
    }
}

/// A websocket channel exchanging JSON text frames.
pub struct WsRelayerChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl RelayerChannel for WsRelayerChannel {
    async fn send(&mut self, command: &RelayerCommand) -> crate::Result<()> {
        let value = serde_json::to_string(command)?;
        self.stream.send(Message::Text(value)).await?;
        Ok(())
    }

    async fn next_response(
        &mut self,
    ) -> Option<crate::Result<CommandResponse>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(v)) => {
                    return Some(serde_json::from_str(&v).map_err(Into::into))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
