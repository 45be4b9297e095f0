use std::net::{self, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use super::rtp_connection::RtpConnection;
use super::send_queue::{OutboundKind, SendQueue};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::media::MediaChannelId;
use crate::protocol::{ConnectionState, Method, RtspRequest, RtspResponse, TransportRequest};
use crate::runtime::{IoPoolHandle, IoWorker, LogicSender};
use crate::session::{MediaSessionId, SessionRegistry};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// What a [`LogicMessage`] asks the logic thread to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Bytes from one socket read, to be parsed as a request.
    Request,
    /// A framed interleaved RTP packet to append to the outbound queue.
    RtpPacket,
    /// The socket closed; release the client's session membership.
    Disconnect,
}

/// Unit of work for the logic thread.
pub struct LogicMessage {
    pub conn: Arc<RtspConnection>,
    pub payload: Bytes,
    pub kind: MessageKind,
}

impl LogicMessage {
    pub fn request(conn: Arc<RtspConnection>, payload: Bytes) -> Self {
        Self {
            conn,
            payload,
            kind: MessageKind::Request,
        }
    }

    pub fn rtp_packet(conn: Arc<RtspConnection>, payload: Bytes) -> Self {
        Self {
            conn,
            payload,
            kind: MessageKind::RtpPacket,
        }
    }

    pub fn disconnect(conn: Arc<RtspConnection>) -> Self {
        Self {
            conn,
            payload: Bytes::new(),
            kind: MessageKind::Disconnect,
        }
    }
}

/// Everything protocol handling needs, injected once at server start.
#[derive(Clone)]
pub struct ProtocolContext {
    pub registry: Arc<SessionRegistry>,
    pub io_pool: IoPoolHandle,
    pub logic: LogicSender<LogicMessage>,
    pub config: Arc<ServerConfig>,
    /// Parent of every connection's close token.
    pub shutdown: CancellationToken,
}

impl ProtocolContext {
    /// Logic-thread entry point.
    pub fn dispatch(&self, message: LogicMessage) {
        let LogicMessage {
            conn,
            payload,
            kind,
        } = message;
        match kind {
            MessageKind::Request => conn.handle_request(&payload, self),
            MessageKind::RtpPacket => {
                if !conn.is_closed() {
                    conn.send_queue.push(OutboundKind::Media, payload);
                }
            }
            MessageKind::Disconnect => conn.handle_disconnect(self),
        }
    }
}

struct RtspState {
    cseq: Option<u32>,
    conn_state: ConnectionState,
    session_id: Option<MediaSessionId>,
    rtp: Option<Arc<RtpConnection>>,
}

/// One client's RTSP control connection.
///
/// Socket reads and writes run on the connection's I/O worker; request
/// handling runs on the logic thread. Each read is taken as one complete
/// request. Outbound bytes leave strictly in the order they were queued.
pub struct RtspConnection {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    send_queue: SendQueue,
    closed: CancellationToken,
    state: Mutex<RtspState>,
}

impl RtspConnection {
    /// Register `stream` on `worker` and start its reader and writer tasks.
    pub fn start(
        stream: net::TcpStream,
        worker: &IoWorker,
        ctx: &ProtocolContext,
    ) -> Result<Arc<Self>> {
        let stream = worker.adopt_tcp_stream(stream)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer_addr, error = %e, "TCP_NODELAY not set");
        }

        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            local_addr,
            send_queue: SendQueue::new(ctx.config.send_queue_capacity),
            closed: ctx.shutdown.child_token(),
            state: Mutex::new(RtspState {
                cseq: None,
                conn_state: ConnectionState::StartConnect,
                session_id: None,
                rtp: None,
            }),
        });

        let (reader, writer) = stream.into_split();
        worker.spawn(read_loop(
            conn.clone(),
            reader,
            ctx.logic.clone(),
            ctx.config.read_buffer_size,
        ));
        worker.spawn(write_loop(conn.clone(), writer));

        tracing::info!(conn = conn.id, peer = %peer_addr, worker = worker.index(), "client connected");
        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().conn_state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop the reader and writer. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            tracing::debug!(conn = self.id, peer = %self.peer_addr, "connection closed");
        }
    }

    fn send_response(&self, response: RtspResponse) {
        tracing::debug!(
            conn = self.id,
            status = response.status_code,
            "response"
        );
        self.send_queue
            .push(OutboundKind::Response, Bytes::from(response.serialize()));
    }

    fn handle_request(self: &Arc<Self>, raw: &[u8], ctx: &ProtocolContext) {
        let cached = self.state.lock().cseq;
        let request = match RtspRequest::parse(raw, cached) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(conn = self.id, peer = %self.peer_addr, error = %e, "request dropped");
                return;
            }
        };

        if request.method == Method::Rtcp {
            tracing::trace!(conn = self.id, bytes = raw.len(), "interleaved RTCP ignored");
            return;
        }
        self.state.lock().cseq = Some(request.cseq);

        tracing::debug!(
            conn = self.id,
            method = %request.method,
            url = %request.url,
            cseq = request.cseq,
            "request"
        );

        let response = match request.method {
            Method::Options => RtspResponse::options(request.cseq),
            Method::Describe => self.handle_describe(&request, ctx),
            Method::Setup => self.handle_setup(&request, ctx),
            Method::Play => self.handle_play(&request),
            Method::Teardown => self.handle_teardown(&request, ctx),
            Method::GetParameter => RtspResponse::ok(request.cseq),
            Method::Rtcp => return,
        };
        self.send_response(response);
    }

    /// Bind the connection to the session named by the URL suffix, join it
    /// as a client and answer with its SDP.
    fn handle_describe(self: &Arc<Self>, request: &RtspRequest, ctx: &ProtocolContext) -> RtspResponse {
        let session = match ctx.registry.get_by_suffix(&request.suffix) {
            Ok(session) => session,
            Err(e) => {
                tracing::info!(conn = self.id, error = %e, "DESCRIBE rejected");
                return RtspResponse::from_error(request.cseq, &e);
            }
        };

        let (rtp, previous) = {
            let mut state = self.state.lock();
            let rtp = state
                .rtp
                .get_or_insert_with(|| {
                    RtpConnection::new(
                        Arc::downgrade(self),
                        self.peer_addr,
                        ctx.logic.clone(),
                        ctx.io_pool.clone(),
                    )
                })
                .clone();
            let previous = state.session_id.replace(session.id());
            (rtp, previous)
        };

        if let Some(old) = previous.filter(|old| *old != session.id()) {
            if let Some(old_session) = ctx.registry.find(old) {
                old_session.remove_client(&rtp);
            }
        }

        for channel in MediaChannelId::ALL {
            if let Some((clock_rate, payload_type)) = session.source_params(channel) {
                rtp.set_media_params(channel, clock_rate, payload_type);
            }
        }
        session.add_client(&rtp);

        match session.get_sdp_message(self.local_addr.ip(), &ctx.config.sdp_session_name) {
            Ok(sdp) => RtspResponse::describe(request.cseq, sdp),
            Err(e) => {
                tracing::warn!(conn = self.id, session = %session.id(), error = %e, "SDP unavailable");
                RtspResponse::from_error(request.cseq, &e)
            }
        }
    }

    fn handle_setup(&self, request: &RtspRequest, ctx: &ProtocolContext) -> RtspResponse {
        let (session_id, rtp) = {
            let state = self.state.lock();
            (state.session_id, state.rtp.clone())
        };
        let (Some(session_id), Some(rtp)) = (session_id, rtp) else {
            tracing::info!(conn = self.id, "SETUP before DESCRIBE");
            return RtspResponse::internal_error(request.cseq);
        };
        if ctx.registry.find(session_id).is_none() {
            tracing::info!(conn = self.id, session = %session_id, "session no longer registered");
            return RtspResponse::internal_error(request.cseq);
        }

        match request.transport {
            Some(TransportRequest::Interleaved {
                rtp_channel,
                rtcp_channel,
            }) => {
                rtp.setup_tcp(request.channel, rtp_channel, rtcp_channel);
                RtspResponse::setup_interleaved(
                    request.cseq,
                    rtp_channel,
                    rtcp_channel,
                    rtp.session_id(),
                )
            }
            Some(TransportRequest::Udp {
                rtp_port,
                rtcp_port,
            }) => match rtp.setup_udp(
                request.channel,
                rtp_port,
                rtcp_port,
                ctx.config.udp_bind_attempts,
                &ctx.config.udp_port_range,
            ) {
                Ok(server_ports) => RtspResponse::setup_udp(
                    request.cseq,
                    (rtp_port, rtcp_port),
                    server_ports,
                    rtp.session_id(),
                ),
                Err(e) => {
                    tracing::warn!(conn = self.id, error = %e, "UDP transport setup failed");
                    RtspResponse::from_error(request.cseq, &e)
                }
            },
            None => RtspResponse::internal_error(request.cseq),
        }
    }

    /// The `Session` header is only checked for shape at parse time; the
    /// connection keeps the session bound at DESCRIBE.
    fn handle_play(&self, request: &RtspRequest) -> RtspResponse {
        let mut state = self.state.lock();
        let Some(rtp) = state.rtp.clone() else {
            tracing::info!(conn = self.id, "PLAY before DESCRIBE");
            return RtspResponse::internal_error(request.cseq);
        };
        if let Some(requested) = request.session.filter(|id| *id != rtp.session_id()) {
            tracing::debug!(conn = self.id, requested, own = rtp.session_id(), "PLAY session mismatch");
        }

        rtp.play();
        state.conn_state = ConnectionState::StartPlay;
        RtspResponse::play(request.cseq, rtp.session_id())
    }

    fn handle_teardown(&self, request: &RtspRequest, ctx: &ProtocolContext) -> RtspResponse {
        let (rtp, session_id) = {
            let mut state = self.state.lock();
            state.conn_state = ConnectionState::StartConnect;
            (state.rtp.take(), state.session_id.take())
        };
        let Some(rtp) = rtp else {
            return RtspResponse::ok(request.cseq);
        };

        rtp.teardown();
        if let Some(session) = session_id.and_then(|id| ctx.registry.find(id)) {
            session.remove_client(&rtp);
        }
        RtspResponse::teardown(request.cseq, rtp.session_id())
    }

    fn handle_disconnect(&self, ctx: &ProtocolContext) {
        let (rtp, session_id) = {
            let mut state = self.state.lock();
            (state.rtp.take(), state.session_id.take())
        };
        if let Some(rtp) = rtp {
            rtp.teardown();
            if let Some(session) = session_id.and_then(|id| ctx.registry.find(id)) {
                session.remove_client(&rtp);
            }
        }
        tracing::info!(conn = self.id, peer = %self.peer_addr, "client disconnected");
    }
}

async fn read_loop(
    conn: Arc<RtspConnection>,
    mut reader: OwnedReadHalf,
    logic: LogicSender<LogicMessage>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let reason = loop {
        tokio::select! {
            _ = conn.closed.cancelled() => break "closed",
            read = reader.read(&mut buf) => match read {
                Ok(0) => break "connection closed by client",
                Ok(n) => {
                    let payload = Bytes::copy_from_slice(&buf[..n]);
                    if !logic.push(LogicMessage::request(conn.clone(), payload)) {
                        break "server shutting down";
                    }
                }
                Err(e) => {
                    tracing::debug!(conn = conn.id, error = %e, "read failed");
                    break "read error";
                }
            },
        }
    };

    tracing::debug!(conn = conn.id, reason, "reader exited");
    conn.close();
    logic.push(LogicMessage::disconnect(conn));
}

async fn write_loop(conn: Arc<RtspConnection>, mut writer: OwnedWriteHalf) {
    'run: loop {
        while !conn.is_closed() {
            let Some(outbound) = conn.send_queue.pop() else {
                break;
            };
            tokio::select! {
                _ = conn.closed.cancelled() => break 'run,
                written = writer.write_all(&outbound.bytes) => {
                    if let Err(e) = written {
                        tracing::debug!(conn = conn.id, error = %e, "write failed");
                        conn.close();
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = conn.closed.cancelled() => break,
            _ = conn.send_queue.notified() => {}
        }
    }

    tracing::debug!(conn = conn.id, pending = conn.send_queue.len(), "writer exited");
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::runtime::{IoServicePool, LogicQueue};

    #[test]
    fn close_stops_a_backed_up_writer() {
        let pool = IoServicePool::new(1).unwrap();
        let logic = LogicQueue::new();
        let ctx = ProtocolContext {
            registry: Arc::new(SessionRegistry::new()),
            io_pool: pool.handle(),
            logic: logic.sender(),
            config: Arc::new(ServerConfig::default()),
            shutdown: CancellationToken::new(),
        };

        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut peer = net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let conn = RtspConnection::start(accepted, pool.next(), &ctx).unwrap();

        // The peer never reads, so the writer blocks once the socket
        // buffers are full.
        const CHUNK: usize = 64 * 1024;
        const CHUNKS: usize = 1024;
        for _ in 0..CHUNKS {
            conn.send_queue
                .push(OutboundKind::Media, Bytes::from(vec![0u8; CHUNK]));
        }
        thread::sleep(Duration::from_millis(200));
        conn.close();

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = vec![0u8; CHUNK];
        let mut received = 0;
        loop {
            match peer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(e) => panic!("socket still open after close: {e}"),
            }
        }
        assert!(received < CHUNKS * CHUNK / 2, "received {received} bytes after close");
        assert!(conn.is_closed());
    }
}
