//! RESP listener.
//!
//! One task per connection. Each task decodes requests with [`RespCodec`],
//! hands them to the gate in arrival order and writes one reply per request.
//! Whatever ends the connection (client close, `QUIT`, protocol error,
//! shutdown), the connection's credential binding is removed.

use crate::gate::CommandAuthorizationGate;
use crate::observability::metrics;
use crate::protocol::{CodecError, Reply, RespCodec};
use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

pub struct GatewayServer {
    listener: TcpListener,
    gate: Arc<CommandAuthorizationGate>,
}

impl GatewayServer {
    /// Bind the listener. Binding happens before serving so startup fails fast
    /// on a taken port.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn bind(address: &str, gate: Arc<CommandAuthorizationGate>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, gate })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled, then wait for open
    /// connections to finish their current command and close.
    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        if let Ok(addr) = self.listener.local_addr() {
            info!(target: "keygate.server", addr = %addr, "RESP server accepting connections");
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(target: "keygate.server", "RESP server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gate = Arc::clone(&self.gate);
                        let connection_shutdown = shutdown.child_token();
                        tracker.spawn(handle_connection(
                            ConnectionId::new(),
                            stream,
                            peer,
                            gate,
                            connection_shutdown,
                        ));
                    }
                    Err(e) => {
                        // Usually transient (e.g. fd exhaustion); keep accepting
                        warn!(target: "keygate.server", error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        tracker.close();
        tracker.wait().await;
        info!(target: "keygate.server", "All connections closed");
    }
}

#[instrument(skip_all, fields(connection_id = %connection, peer = %peer))]
async fn handle_connection(
    connection: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    gate: Arc<CommandAuthorizationGate>,
    shutdown: CancellationToken,
) {
    debug!(target: "keygate.server", "Connection opened");
    metrics::record_connection_opened();

    let mut framed = Framed::new(stream, RespCodec::new());

    loop {
        let request = tokio::select! {
            () = shutdown.cancelled() => break,
            request = framed.next() => request,
        };

        let args = match request {
            None => break,
            Some(Ok(args)) => args,
            Some(Err(CodecError::Protocol(msg))) => {
                debug!(target: "keygate.server", error = %msg, "Protocol error, closing connection");
                let _ = framed
                    .send(Reply::Error(format!("ERR Protocol error: {msg}")))
                    .await;
                break;
            }
            Some(Err(CodecError::Io(e))) => {
                debug!(target: "keygate.server", error = %e, "Read failed");
                break;
            }
        };

        if args.is_empty() {
            continue;
        }

        let response = gate.handle(connection, &args).await;
        if let Err(e) = framed.send(response.reply).await {
            debug!(target: "keygate.server", error = %e, "Write failed");
            break;
        }
        if response.close {
            break;
        }
    }

    gate.disconnect(connection);
    metrics::record_connection_closed();
    debug!(target: "keygate.server", "Connection closed");
}
