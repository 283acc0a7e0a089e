//! Generic TCP request/response server.
//!
//! One task accepts connections; each connection gets a task that reads a
//! request frame, dispatches it and writes the reply frame, in order.

use crate::config::TcpRpcConfig;
use crate::frame::MessageFrame;
use crate::protocol::RpcService;
use duel_core::{DuelError, DuelResult, LeaderAddress};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct RpcServer;

impl RpcServer {
    /// Bind to `config.bind_addr` and start serving `service`.
    pub async fn bind<S: RpcService>(
        config: TcpRpcConfig,
        service: Arc<S>,
    ) -> DuelResult<RpcServerHandle> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            DuelError::transport(format!("Failed to bind to {}: {}", config.bind_addr, e))
        })?;
        Self::serve(listener, config, service)
    }

    /// Serve `service` on an already bound listener.
    ///
    /// A replica binds first so it can advertise its address to its
    /// leadership coordinator before the service exists.
    pub fn serve<S: RpcService>(
        listener: TcpListener,
        config: TcpRpcConfig,
        service: Arc<S>,
    ) -> DuelResult<RpcServerHandle> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| DuelError::transport(format!("Failed to get local address: {}", e)))?;
        info!("RPC server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_connections(
            listener,
            service,
            config.max_message_size,
            shutdown_rx,
        ));

        Ok(RpcServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Running server. Dropping the handle stops it.
pub struct RpcServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RpcServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address to advertise in a leader pointer.
    pub fn address(&self) -> LeaderAddress {
        LeaderAddress::from(self.local_addr)
    }

    /// Stop accepting and close every open connection.
    pub async fn shutdown(self) {
        info!("Shutting down RPC server on {}", self.local_addr);
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

async fn accept_connections<S: RpcService>(
    listener: TcpListener,
    service: Arc<S>,
    max_message_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    service.clone(),
                    max_message_size,
                    shutdown_rx.clone(),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn serve_connection<S: RpcService>(
    mut stream: TcpStream,
    addr: SocketAddr,
    service: Arc<S>,
    max_message_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
            frame = MessageFrame::read_from(&mut stream, max_message_size) => frame,
        };

        let request = match frame {
            Ok(Some(frame)) => frame.decode::<S::Request>(),
            Ok(None) => {
                debug!("Connection from {} closed", addr);
                break;
            }
            Err(e) => {
                debug!("Connection from {} failed: {}", addr, e);
                break;
            }
        };

        let reply: DuelResult<S::Response> = match request {
            Ok(request) => service.handle(request).await,
            Err(e) => {
                warn!("Undecodable request from {}: {}", addr, e);
                Err(e)
            }
        };

        let frame = match MessageFrame::encode(&reply, max_message_size) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode reply to {}: {}", addr, e);
                break;
            }
        };
        if let Err(e) = frame.write_to(&mut stream).await {
            debug!("Failed to reply to {}: {}", addr, e);
            break;
        }
    }
}
