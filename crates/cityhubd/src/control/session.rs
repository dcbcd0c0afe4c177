//! Per-connection control session.
//!
//! A session is opened by writing the banner and joining the client set,
//! then replays the registry snapshot and processes one command per line
//! until the client leaves, a reply can no longer be written, or the gateway
//! shuts down.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use cityhub_core::{ControlRequest, Notice};
use cityhub_services::ClientHandle;

use super::SessionContext;
use crate::shutdown::Shutdown;

/// Longest control line accepted, newline excluded. Longer lines are
/// discarded up to their newline and answered with the usage hint.
pub const MAX_LINE: usize = 1024;

pub struct ControlSession<R> {
    handle: ClientHandle,
    reader: BufReader<R>,
    line: Vec<u8>,
    ctx: SessionContext,
    shutdown: Shutdown,
}

impl<R> ControlSession<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Send the banner, then join the client set. Fails only if the banner
    /// cannot be written, in which case the client never joins.
    pub async fn open<W>(
        peer: SocketAddr,
        reader: R,
        writer: W,
        ctx: SessionContext,
        shutdown: Shutdown,
    ) -> io::Result<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handle = ctx.clients.join(peer, writer, &Notice::Banner).await?;
        Ok(Self {
            handle,
            reader: BufReader::new(reader),
            line: Vec::new(),
            ctx,
            shutdown,
        })
    }

    pub async fn run(mut self) {
        let id = self.handle.id();
        let peer = self.handle.peer();

        if let Err(e) = self.send_snapshot().await {
            tracing::warn!(session = id, %peer, error = %e, "failed to replay registry");
            self.ctx.clients.remove(id);
            return;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::debug!(session = id, "control session closing for shutdown");
                    break;
                }

                line = read_line_capped(&mut self.reader, &mut self.line) => {
                    let reply = match line {
                        Ok(Some(ControlLine::Text(line))) => self.handle_line(&line).await,
                        Ok(Some(ControlLine::TooLong)) => {
                            tracing::debug!(session = id, max = MAX_LINE, "discarded over-long control line");
                            self.handle.send(&Notice::FormatError).await
                        }
                        Ok(None) => {
                            tracing::info!(session = id, %peer, "control session closed by peer");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(session = id, %peer, error = %e, "control session read failed");
                            break;
                        }
                    };
                    if let Err(e) = reply {
                        tracing::warn!(session = id, %peer, error = %e, "control session write failed");
                        break;
                    }
                }
            }
        }

        // A concurrent fan-out may already have removed us.
        self.ctx.clients.remove(id);
    }

    async fn send_snapshot(&self) -> io::Result<()> {
        for record in self.ctx.registry.snapshot() {
            self.handle.send(&record.notice()).await?;
        }
        Ok(())
    }

    /// Handle one client line. Only write failures are returned; every
    /// protocol or dispatch problem is answered or logged here.
    async fn handle_line(&self, line: &str) -> io::Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        tracing::debug!(session = self.handle.id(), line, "control command");

        match line.parse::<ControlRequest>() {
            Ok(ControlRequest::List) => self.send_snapshot().await,

            Ok(ControlRequest::Discover) => {
                match &self.ctx.discovery {
                    Some(discovery) => match discovery.solicit().await {
                        Ok(_) => tracing::info!(session = self.handle.id(), "DISCOVERY sent on request"),
                        Err(e) => tracing::warn!(error = %e, "DISCOVERY send failed"),
                    },
                    None => tracing::warn!("DISCOVERY requested but no discovery sender is available"),
                }
                self.handle.send(&Notice::DiscoverySent).await
            }

            Ok(ControlRequest::Command {
                device_id,
                action,
                param,
            }) => {
                self.ctx.dispatcher.deliver(&device_id, &action, &param).await;
                self.handle.send(&Notice::CommandSent { device_id }).await
            }

            Err(e) => {
                tracing::debug!(session = self.handle.id(), error = %e, "malformed control line");
                self.handle.send(&Notice::FormatError).await
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum ControlLine {
    Text(String),
    TooLong,
}

/// Read one newline-terminated line, buffering at most [`MAX_LINE`] bytes.
/// Bytes past the cap are consumed and dropped until the next newline.
/// A final unterminated line is returned as is; `None` means EOF.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<ControlLine>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut overflow = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (overflow, buf.is_empty()) {
                (true, _) => Some(ControlLine::TooLong),
                (false, true) => None,
                (false, false) => Some(ControlLine::Text(String::from_utf8_lossy(buf).into_owned())),
            });
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let chunk = &available[..newline.unwrap_or(available.len())];
        if !overflow {
            if buf.len() + chunk.len() > MAX_LINE {
                overflow = true;
                buf.clear();
            } else {
                buf.extend_from_slice(chunk);
            }
        }
        let used = chunk.len() + usize::from(newline.is_some());
        reader.consume(used);

        if newline.is_some() {
            return Ok(Some(if overflow {
                ControlLine::TooLong
            } else {
                ControlLine::Text(String::from_utf8_lossy(buf).into_owned())
            }));
        }
    }
}
