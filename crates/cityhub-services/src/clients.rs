//! Client set: the control sessions currently connected to the gateway.
//!
//! Used for fan-out only: registry changes and readings are pushed to every
//! session as text lines. A session stays in the set for as long as writes to
//! it succeed; the first failed write removes it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use cityhub_core::Notice;

/// Identifies one control session for its whole lifetime.
pub type SessionId = u64;

type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one control session.
///
/// Shared between the session's own handler (command replies) and every
/// fan-out; the mutex keeps lines from interleaving.
#[derive(Clone)]
pub struct ClientHandle {
    id: SessionId,
    peer: SocketAddr,
    writer: Arc<Mutex<SessionWriter>>,
    write_timeout: Duration,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write `line` plus a newline. Fails if the peer is gone or the write
    /// stalls past the write timeout.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "control session write timed out",
            )),
        }
    }

    pub async fn send(&self, notice: &Notice) -> io::Result<()> {
        self.send_line(&notice.to_string()).await
    }
}

/// The set of connected control sessions. Cheap to clone, shared by every
/// gateway task.
#[derive(Clone)]
pub struct ClientSet {
    sessions: Arc<DashMap<SessionId, ClientHandle>>,
    next_id: Arc<AtomicU64>,
    write_timeout: Duration,
}

impl ClientSet {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            write_timeout,
        }
    }

    /// Add a session. It receives every fan-out from this point on.
    pub fn register<W>(&self, peer: SocketAddr, writer: W) -> ClientHandle
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handle = self.handle(peer, writer);
        self.insert(handle.clone());
        handle
    }

    /// Write `greeting` to a new session, then add it to the set, so the
    /// greeting is the first line the session ever receives.
    pub async fn join<W>(&self, peer: SocketAddr, writer: W, greeting: &Notice) -> io::Result<ClientHandle>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handle = self.handle(peer, writer);
        handle.send(greeting).await?;
        self.insert(handle.clone());
        Ok(handle)
    }

    fn handle<W>(&self, peer: SocketAddr, writer: W) -> ClientHandle
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        ClientHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            write_timeout: self.write_timeout,
        }
    }

    fn insert(&self, handle: ClientHandle) {
        let (id, peer) = (handle.id, handle.peer);
        self.sessions.insert(id, handle);
        tracing::info!(session = id, %peer, clients = self.sessions.len(), "control session added");
    }

    /// Remove a session. Idempotent: only the first call for an id returns
    /// true, later calls (from other tasks seeing the same failure) are no-ops.
    pub fn remove(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, handle)) => {
                tracing::info!(
                    session = id,
                    peer = %handle.peer,
                    clients = self.sessions.len(),
                    "control session removed"
                );
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Deliver `line` to every session present when the call starts.
    ///
    /// Writes run concurrently, so one stalled session does not hold up the
    /// rest. Sessions whose write fails are removed. Returns the number of
    /// sessions that received the line.
    pub async fn broadcast(&self, line: &str) -> usize {
        let snapshot: Vec<ClientHandle> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        if snapshot.is_empty() {
            return 0;
        }

        let results = join_all(snapshot.iter().map(|c| c.send_line(line))).await;

        let mut delivered = 0;
        for (client, result) in snapshot.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(session = client.id, peer = %client.peer, error = %e, "fan-out write failed");
                    self.remove(client.id);
                }
            }
        }
        delivered
    }

    pub async fn notify(&self, notice: &Notice) -> usize {
        self.broadcast(&notice.to_string()).await
    }
}
