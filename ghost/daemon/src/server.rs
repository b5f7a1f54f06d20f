//! Daemon Server Implementation
//!
//! This module provides the server loop for the ghost daemon:
//! - Accepts request connections on a Unix socket and answers them through
//!   the ghost's dispatch loop
//! - Accepts presenter connections on a second Unix socket and streams
//!   render commands to them as JSON lines
//! - Tracks connected presenters and drops the dead ones
//! - Supports graceful shutdown, delivering a final OnClose to the ghost
//!
//! # Two-Socket Architecture
//!
//! ```text
//!      front-end(s)                      presenter(s)
//!           │ requests                        ▲ render commands
//!           ▼                                 │
//!   ghost-runtime.sock            ghost-runtime-render.sock
//!           │                                 │
//!           └────────────► Ghost ─────────────┘
//!                     (dispatch loop)
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::{fs, io};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use ghost_core::{
    Ghost, GhostConfig, GhostHandle, ParseError, RenderCommand, RenderError, RenderSink, Request,
    Response,
};

/// Identity of one presenter connection.
type PeerId = u64;

/// Configuration for the daemon server
pub struct ServerConfig {
    /// Maximum number of concurrent request connections
    pub max_connections: usize,
    /// Per-presenter render channel capacity
    pub render_channel_capacity: usize,
    /// Largest request frame we will buffer before giving up
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            render_channel_capacity: 256,
            max_request_bytes: 64 * 1024,
        }
    }
}

/// Render sink that fans commands out to every connected presenter.
///
/// No presenter connected is not an error; the ghost keeps running and the
/// commands are simply dropped, same as a companion talking to an empty room.
#[derive(Debug, Default)]
pub struct SocketSink {
    peers: DashMap<PeerId, mpsc::Sender<String>>,
}

impl SocketSink {
    fn register(&self, id: PeerId, tx: mpsc::Sender<String>) {
        self.peers.insert(id, tx);
    }

    fn unregister(&self, id: PeerId) {
        self.peers.remove(&id);
    }

    /// Number of presenters currently attached.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl RenderSink for SocketSink {
    async fn send(&self, command: RenderCommand) -> Result<(), RenderError> {
        let line = serde_json::to_string(&command)
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;
        let mut dead = Vec::new();
        for peer in self.peers.iter() {
            if peer.value().try_send(line.clone()).is_err() {
                dead.push(*peer.key());
            }
        }
        for id in dead {
            warn!(peer = id, "dropping unresponsive presenter");
            self.peers.remove(&id);
        }
        Ok(())
    }
}

/// The main daemon server
pub struct DaemonServer {
    /// Socket answering requests
    shiori_socket: PathBuf,
    /// Socket streaming render commands
    render_socket: PathBuf,
    /// Runtime configuration handed to the ghost
    config: GhostConfig,
    /// Server tuning
    server_config: ServerConfig,
    /// Active request connections
    active_connections: Arc<AtomicU64>,
    /// Presenter id allocator
    next_peer: AtomicU64,
}

impl DaemonServer {
    /// Create a new daemon server
    #[must_use]
    pub fn new(config: GhostConfig) -> Self {
        Self {
            shiori_socket: config.daemon.shiori_socket.clone(),
            render_socket: config.daemon.render_socket.clone(),
            config,
            server_config: ServerConfig::default(),
            active_connections: Arc::new(AtomicU64::new(0)),
            next_peer: AtomicU64::new(0),
        }
    }

    /// Get peer credentials from a Unix socket
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            Some(cred.uid)
        } else {
            None
        }
    }

    /// Reject connections from other users. Root is allowed through.
    fn peer_allowed(stream: &UnixStream) -> bool {
        let our_uid = unsafe { libc::getuid() };
        match Self::get_peer_uid(stream) {
            Some(uid) if uid != our_uid && uid != 0 => {
                warn!(peer_uid = uid, our_uid, "rejecting connection from different user");
                false
            }
            _ => true,
        }
    }

    /// Prepare a socket path (create directory, remove stale socket)
    fn prepare_socket(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }
        if path.exists() {
            warn!(path = ?path, "Removing stale socket file");
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {path:?}"))?;
        }
        Ok(())
    }

    fn bind(path: &PathBuf) -> Result<UnixListener> {
        Self::prepare_socket(path)?;
        let listener =
            UnixListener::bind(path).with_context(|| format!("Failed to bind to {path:?}"))?;
        let perms = {
            use std::os::unix::fs::PermissionsExt;
            fs::Permissions::from_mode(0o600)
        };
        fs::set_permissions(path, perms)?;
        info!(path = ?path, "Listening");
        Ok(listener)
    }

    /// Run the daemon server until `shutdown` is set or the ghost closes.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let shiori = Self::bind(&self.shiori_socket)?;
        let render = Self::bind(&self.render_socket)?;

        let sink = Arc::new(SocketSink::default());
        let ghost = Ghost::new(self.config.clone(), sink.clone());
        let handle = ghost.handle();
        let ghost_task = ghost.spawn();
        info!("Ghost started");

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }
            if ghost_task.is_finished() {
                info!("Ghost terminated, stopping accept loop");
                break;
            }

            tokio::select! {
                // Periodic wake-up so the shutdown flag is honored promptly.
                () = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {}

                accepted = shiori.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.accept_request_conn(stream, handle.clone()),
                        Err(e) => error!(error = %e, "Request accept failed"),
                    }
                }

                accepted = render.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.accept_presenter_conn(stream, &sink),
                        Err(e) => error!(error = %e, "Presenter accept failed"),
                    }
                }
            }
        }

        self.shutdown(handle).await
    }

    fn accept_request_conn(&self, stream: UnixStream, handle: GhostHandle) {
        if !Self::peer_allowed(&stream) {
            return;
        }
        let active = self.active_connections.load(Ordering::SeqCst);
        if active as usize >= self.server_config.max_connections {
            warn!("Connection limit reached, rejecting new connection");
            return;
        }
        let conn_id = self.next_peer.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.active_connections);
        counter.fetch_add(1, Ordering::SeqCst);
        info!(conn_id, active_connections = active + 1, "Request connection accepted");

        let max_request_bytes = self.server_config.max_request_bytes;
        tokio::spawn(
            async move {
                if let Err(e) = handle_request_conn(stream, handle, max_request_bytes).await {
                    debug!(error = %e, "Request connection ended with error");
                }
                counter.fetch_sub(1, Ordering::SeqCst);
                info!("Request connection closed");
            }
            .instrument(tracing::info_span!("request_conn", conn_id)),
        );
    }

    fn accept_presenter_conn(&self, stream: UnixStream, sink: &Arc<SocketSink>) {
        if !Self::peer_allowed(&stream) {
            return;
        }
        let peer_id = self.next_peer.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::channel::<String>(self.server_config.render_channel_capacity);
        sink.register(peer_id, tx);
        info!(peer_id, presenters = sink.peer_count(), "Presenter connected");

        let sink = Arc::clone(sink);
        tokio::spawn(
            async move {
                let mut stream = stream;
                while let Some(line) = rx.recv().await {
                    let framed = format!("{line}\n");
                    if let Err(e) = stream.write_all(framed.as_bytes()).await {
                        debug!(error = %e, "Presenter write failed");
                        break;
                    }
                }
                sink.unregister(peer_id);
                info!(presenters = sink.peer_count(), "Presenter disconnected");
            }
            .instrument(tracing::info_span!("presenter_conn", peer_id)),
        );
    }

    /// Graceful shutdown: tell the ghost to close, then remove the sockets.
    async fn shutdown(&mut self, handle: GhostHandle) -> Result<()> {
        info!("Initiating graceful shutdown");

        match handle.request(Request::synthetic("OnClose")).await {
            Ok(response) => debug!(status = response.status.code(), "Ghost closed"),
            Err(_) => debug!("Ghost was already gone"),
        }

        for path in [&self.shiori_socket, &self.render_socket] {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove socket: {path:?}"))?;
                info!(path = ?path, "Socket file removed");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Serve one request connection: repeated blank-line-terminated frames,
/// each answered in order.
async fn handle_request_conn(
    mut stream: UnixStream,
    handle: GhostHandle,
    max_request_bytes: usize,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 4096];

    loop {
        while frame_end(&buf).is_none() {
            if buf.len() > max_request_bytes {
                let response = Response::bad_request("request frame too large");
                stream.write_all(&response.encode()).await?;
                return Ok(());
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                // EOF between frames is a normal hangup.
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let end = frame_end(&buf).unwrap_or(buf.len());
        let frame: Vec<u8> = buf.drain(..end).collect();

        let response = match Request::decode(&frame) {
            Ok(request) => {
                debug!(event = request.event_id(), "Request decoded");
                match handle.request(request).await {
                    Ok(response) => response,
                    Err(e) => Response::internal_error(e.to_string()),
                }
            }
            Err(e @ ParseError::IncompleteFrame) => {
                // Should not happen once a blank line was seen; answer anyway.
                Response::bad_request(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Malformed request");
                Response::bad_request(e.to_string())
            }
        };
        stream.write_all(&response.encode()).await?;
    }
}

/// Byte offset just past the first blank line, if the buffer holds a
/// complete frame. Accepts both CRLF and bare LF line endings.
fn frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .into_iter()
        .chain(buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
        .min()
}
