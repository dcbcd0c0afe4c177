//! Control server TCP accept loop.
//!
//! Each accepted connection is handed to its own task, which greets the
//! client, joins it to the client set and runs its [`ControlSession`].

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::{ControlSession, SessionContext};
use crate::shutdown::Shutdown;

pub struct ControlServer {
    listener: TcpListener,
    ctx: SessionContext,
    shutdown: Shutdown,
}

impl ControlServer {
    pub fn new(listener: TcpListener, ctx: SessionContext, shutdown: Shutdown) -> Self {
        Self {
            listener,
            ctx,
            shutdown,
        }
    }

    /// Accept until shutdown, then wait for every session task to finish.
    pub async fn run(mut self) -> Result<()> {
        let mut sessions = JoinSet::new();

        tracing::info!(addr = ?self.listener.local_addr().ok(), "control server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::info!(sessions = sessions.len(), "control server shutting down");
                    break;
                }

                // Reap finished sessions so the set does not grow unbounded.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            sessions.spawn(self.session_task(stream, peer));
                        }
                        Err(e) => tracing::warn!(error = %e, "control accept failed"),
                    }
                }
            }
        }

        // Every session watches the same signal; this only waits for them to
        // release their sockets.
        while sessions.join_next().await.is_some() {}
        Ok(())
    }

    fn session_task(&self, stream: TcpStream, peer: SocketAddr) -> impl Future<Output = ()> + Send + 'static {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "TCP_NODELAY failed");
        }
        let (reader, writer) = stream.into_split();
        let ctx = self.ctx.clone();
        let session_shutdown = self.shutdown.clone();
        let mut shutdown = self.shutdown.clone();

        async move {
            let opened = tokio::select! {
                _ = shutdown.wait() => return,
                opened = ControlSession::open(peer, reader, writer, ctx, session_shutdown) => opened,
            };
            match opened {
                Ok(session) => session.run().await,
                Err(e) => tracing::warn!(%peer, error = %e, "failed to greet control session"),
            }
        }
    }
}
