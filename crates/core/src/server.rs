use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::media::{AVFrame, MediaChannelId};
use crate::runtime::{IoPoolHandle, IoServicePool, LogicQueue};
use crate::session::{MediaSession, MediaSessionId, SessionRegistry};
use crate::transport::{LogicMessage, ProtocolContext, RtspConnection};

/// Live RTSP server.
///
/// Owns the session registry, the I/O worker pool and the logic queue, and
/// wires them together at [`start`](Self::start). Frames pushed with
/// [`push_frame`](Self::push_frame) are packetized on the caller's thread
/// and fanned out to every client of the session.
///
/// ```no_run
/// use rtsp_live::{AVFrame, FrameType, H264Source, MediaChannelId, MediaSession, RtspServer, ServerConfig};
///
/// let server = RtspServer::start(ServerConfig::default())?;
/// let session = MediaSession::new("live");
/// session.add_source(MediaChannelId::Channel0, Box::new(H264Source::new(25)));
/// let id = server.add_session(session)?;
///
/// let nal = vec![0x65, 0x88, 0x84];
/// server.push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal, FrameType::VideoI))?;
/// # Ok::<(), rtsp_live::RtspError>(())
/// ```
pub struct RtspServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    io_pool: IoServicePool,
    logic: Mutex<LogicQueue<LogicMessage>>,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
}

impl RtspServer {
    /// Bind the listener and start the worker threads.
    pub fn start(config: ServerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let listener = TcpListener::bind(&config.bind_addr)?;
        let local_addr = listener.local_addr()?;

        let io_pool = IoServicePool::new(config.io_workers)?;
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();

        let mut logic = LogicQueue::new();
        let ctx = ProtocolContext {
            registry: registry.clone(),
            io_pool: io_pool.handle(),
            logic: logic.sender(),
            config: config.clone(),
            shutdown: shutdown.clone(),
        };
        let dispatcher = ctx.clone();
        logic.start(move |message| dispatcher.dispatch(message))?;

        let acceptor = io_pool.next().clone();
        let listener = acceptor.adopt_tcp_listener(listener)?;
        acceptor.spawn(accept_loop(listener, ctx));

        tracing::info!(
            addr = %local_addr,
            workers = io_pool.handle().len(),
            "RTSP server listening"
        );

        Ok(Self {
            config,
            registry,
            io_pool,
            logic: Mutex::new(logic),
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    /// Register a session. Fails if its URL suffix is already taken.
    pub fn add_session(&self, session: MediaSession) -> Result<MediaSessionId> {
        let suffix = session.suffix().to_string();
        let id = self.registry.add(Arc::new(session))?;
        tracing::info!(session = %id, suffix, "media session registered");
        Ok(id)
    }

    pub fn remove_session(&self, id: MediaSessionId) -> Option<Arc<MediaSession>> {
        let removed = self.registry.remove(id);
        if let Some(session) = &removed {
            tracing::info!(session = %id, suffix = session.suffix(), "media session removed");
        }
        removed
    }

    pub fn find_session(&self, id: MediaSessionId) -> Option<Arc<MediaSession>> {
        self.registry.find(id)
    }

    pub fn find_session_by_suffix(&self, suffix: &str) -> Option<Arc<MediaSession>> {
        self.registry.find_by_suffix(suffix)
    }

    /// Packetize and deliver one frame. Returns `Ok(false)` without touching
    /// the source when the session has no clients.
    pub fn push_frame(
        &self,
        session: MediaSessionId,
        channel: MediaChannelId,
        frame: AVFrame,
    ) -> Result<bool> {
        let session = self
            .registry
            .find(session)
            .ok_or(RtspError::SessionNotFound(session))?;
        if session.client_count() == 0 {
            return Ok(false);
        }
        session.handle_frame(channel, frame)?;
        Ok(true)
    }

    pub fn io_pool(&self) -> IoPoolHandle {
        self.io_pool.handle()
    }

    /// Stop accepting, close every connection, drain the logic queue and
    /// stop the I/O workers. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("server stopping");
        self.shutdown.cancel();
        self.logic.lock().shutdown();
        self.io_pool.shutdown();
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: tokio::net::TcpListener, ctx: ProtocolContext) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted.and_then(|(stream, _)| stream.into_std()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
                continue;
            }
        };

        let worker = ctx.io_pool.next().clone();
        if let Err(e) = RtspConnection::start(stream, &worker, &ctx) {
            tracing::warn!(error = %e, "failed to start connection");
        }
    }
    tracing::debug!("accept loop exited");
}
