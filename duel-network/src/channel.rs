use crate::config::TcpRpcConfig;
use crate::frame::MessageFrame;
use duel_core::{DuelError, DuelResult, LeaderAddress};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Request/response channel to one leader address.
///
/// Building a channel does no I/O; the connection is dialed on the first
/// call. Any failure drops the connection so the next call redials. Calls
/// through one channel are serialised; clones share the connection.
#[derive(Debug, Clone)]
pub struct TcpChannel {
    address: LeaderAddress,
    config: TcpRpcConfig,
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl TcpChannel {
    pub fn new(address: LeaderAddress, config: TcpRpcConfig) -> Self {
        Self {
            address,
            config,
            stream: Arc::new(Mutex::new(None)),
        }
    }

    pub fn address(&self) -> &LeaderAddress {
        &self.address
    }

    /// Send `request` and wait for the reply, bounded by the call timeout.
    pub async fn call<Req, Resp>(&self, request: &Req) -> DuelResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let frame = MessageFrame::encode(request, self.config.max_message_size)?;

        match timeout(self.config.call_timeout, self.exchange(&frame)).await {
            Ok(reply) => reply,
            Err(_) => {
                // The exchange was cut off mid-flight; the stream is unusable.
                *self.stream.lock().await = None;
                Err(DuelError::transport(format!(
                    "call to {} timed out after {:?}",
                    self.address, self.config.call_timeout
                )))
            }
        }
    }

    async fn exchange<Resp: DeserializeOwned>(&self, frame: &MessageFrame) -> DuelResult<Resp> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(DuelError::transport("connection unavailable"));
        };

        let reply = match Self::round_trip(stream, frame, self.config.max_message_size).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping connection to {}: {}", self.address, e);
                *guard = None;
                return Err(e);
            }
        };

        match reply.decode::<DuelResult<Resp>>() {
            Ok(result) => result,
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    async fn round_trip(
        stream: &mut TcpStream,
        frame: &MessageFrame,
        max_message_size: usize,
    ) -> DuelResult<MessageFrame> {
        frame.write_to(stream).await?;
        MessageFrame::read_from(stream, max_message_size)
            .await?
            .ok_or_else(|| DuelError::transport("connection closed by peer"))
    }

    async fn dial(&self) -> DuelResult<TcpStream> {
        let target = self.address.host_port();
        debug!("Dialing {}", target);
        match timeout(self.config.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(DuelError::transport(format!(
                "Failed to connect to {}: {}",
                self.address, e
            ))),
            Err(_) => Err(DuelError::transport(format!(
                "Connecting to {} timed out",
                self.address
            ))),
        }
    }

    /// True while a dialed connection is held.
    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}
