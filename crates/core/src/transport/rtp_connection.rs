use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngExt;
use tokio_util::sync::CancellationToken;

use super::rtsp_connection::{LogicMessage, RtspConnection};
use crate::error::{Result, RtspError};
use crate::media::rtp::RTP_TCP_HEAD_SIZE;
use crate::media::{MAX_MEDIA_CHANNEL, MediaChannelId, MediaType, RtpHeader, RtpPacket};
use crate::runtime::{IoPoolHandle, IoWorker, LogicSender};

/// How RTP reaches the client, chosen by the first SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Separate UDP datagrams to the client's `client_port` pair.
    Udp,
    /// `$`-framed inside the RTSP control connection (RFC 2326 §10.12).
    Interleaved,
}

struct UdpChannel {
    socket: Arc<tokio::net::UdpSocket>,
    worker: IoWorker,
    peer_rtp: SocketAddr,
    local_rtp_port: u16,
    local_rtcp_port: u16,
}

struct ChannelInfo {
    header: RtpHeader,
    clock_rate: u32,
    is_setup: bool,
    is_play: bool,
    is_record: bool,
    rtp_channel: u8,
    rtcp_channel: u8,
    udp: Option<UdpChannel>,
}

impl ChannelInfo {
    fn new() -> Self {
        Self {
            header: RtpHeader::with_random_state(MediaType::H264.payload_type()),
            clock_rate: 0,
            is_setup: false,
            is_play: false,
            is_record: false,
            rtp_channel: 0,
            rtcp_channel: 0,
            udp: None,
        }
    }

    fn armed(&self) -> bool {
        self.is_play || self.is_record
    }
}

pub(crate) struct RtpState {
    mode: Option<TransportMode>,
    closed: bool,
    has_key_frame: bool,
    channels: [ChannelInfo; MAX_MEDIA_CHANNEL],
}

impl RtpState {
    fn new() -> Self {
        Self {
            mode: None,
            closed: false,
            has_key_frame: false,
            channels: [ChannelInfo::new(), ChannelInfo::new()],
        }
    }

    /// Record keyframe arrival and, when the channel may transmit, write the
    /// RTP header into `packet`. Returns whether the packet should go out.
    ///
    /// The keyframe flag is latched even while nothing is armed, so a client
    /// that starts playing mid-GOP still waits only for the first keyframe
    /// it has not yet seen.
    fn stamp(&mut self, channel: MediaChannelId, packet: &mut RtpPacket) -> bool {
        if !self.has_key_frame && packet.frame_type.is_key() {
            self.has_key_frame = true;
        }

        let info = &mut self.channels[channel.index()];
        if !info.armed() || !self.has_key_frame {
            return false;
        }
        info.header
            .write(packet.last, packet.timestamp, packet.header_mut());
        true
    }
}

/// One client's RTP delivery state: per-channel header template, transport
/// endpoints, play/record flags and keyframe gating.
///
/// Holds only a weak reference to its [`RtspConnection`]; the connection
/// layer owns the lifetime.
pub struct RtpConnection {
    rtsp: Weak<RtspConnection>,
    peer_addr: SocketAddr,
    session_id: u32,
    logic: LogicSender<LogicMessage>,
    io_pool: IoPoolHandle,
    rtcp_shutdown: CancellationToken,
    state: Mutex<RtpState>,
}

impl RtpConnection {
    pub(crate) fn new(
        rtsp: Weak<RtspConnection>,
        peer_addr: SocketAddr,
        logic: LogicSender<LogicMessage>,
        io_pool: IoPoolHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            rtsp,
            peer_addr,
            session_id: rand::rng().random::<u32>(),
            logic,
            io_pool,
            rtcp_shutdown: CancellationToken::new(),
            state: Mutex::new(RtpState::new()),
        })
    }

    /// Value of the RTSP `Session` header for this client.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Peer address of the owning RTSP control connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn transport_mode(&self) -> Option<TransportMode> {
        self.state.lock().mode
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_playing(&self, channel: MediaChannelId) -> bool {
        self.state.lock().channels[channel.index()].is_play
    }

    pub fn is_recording(&self, channel: MediaChannelId) -> bool {
        self.state.lock().channels[channel.index()].is_record
    }

    /// Server-side `(rtp, rtcp)` ports bound for a UDP channel.
    pub fn server_ports(&self, channel: MediaChannelId) -> Option<(u16, u16)> {
        self.state.lock().channels[channel.index()]
            .udp
            .as_ref()
            .map(|udp| (udp.local_rtp_port, udp.local_rtcp_port))
    }

    /// `(rtp, rtcp)` interleaved channel numbers negotiated for `channel`.
    pub fn interleaved_channels(&self, channel: MediaChannelId) -> Option<(u8, u8)> {
        let state = self.state.lock();
        let info = &state.channels[channel.index()];
        (state.mode == Some(TransportMode::Interleaved) && info.is_setup)
            .then_some((info.rtp_channel, info.rtcp_channel))
    }

    pub fn set_media_params(&self, channel: MediaChannelId, clock_rate: u32, payload_type: u8) {
        let mut state = self.state.lock();
        let info = &mut state.channels[channel.index()];
        info.clock_rate = clock_rate;
        info.header.pt = payload_type;
    }

    pub fn clock_rate(&self, channel: MediaChannelId) -> u32 {
        self.state.lock().channels[channel.index()].clock_rate
    }

    /// Bind a server RTP/RTCP port pair for `channel` and target the
    /// client's `client_port` pair at the RTSP peer's address.
    ///
    /// RTP ports are even and drawn at random from `port_range`; RTCP is
    /// `rtp + 1`. Each socket lands on the next I/O worker. Gives up with
    /// [`RtspError::PortRangeExhausted`] after `attempts` tries.
    pub fn setup_udp(
        &self,
        channel: MediaChannelId,
        client_rtp_port: u16,
        client_rtcp_port: u16,
        attempts: u32,
        port_range: &RangeInclusive<u16>,
    ) -> Result<(u16, u16)> {
        let lo = port_range.start().div_ceil(2);
        let hi = port_range.end() / 2;
        if lo > hi {
            return Err(RtspError::PortRangeExhausted { attempts: 0 });
        }

        for attempt in 1..=attempts {
            let rtp_port = rand::rng().random_range(lo..=hi) * 2;
            let rtcp_port = rtp_port + 1;

            let rtp = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, rtp_port)) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!(attempt, rtp_port, error = %e, "RTP port bind failed");
                    continue;
                }
            };
            let rtcp = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, rtcp_port)) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!(attempt, rtcp_port, error = %e, "RTCP port bind failed");
                    continue;
                }
            };

            let rtp_worker = self.io_pool.next().clone();
            let rtp = Arc::new(rtp_worker.adopt_udp_socket(rtp)?);
            let rtcp_worker = self.io_pool.next().clone();
            let rtcp = rtcp_worker.adopt_udp_socket(rtcp)?;
            spawn_rtcp_reader(&rtcp_worker, rtcp, channel, self.rtcp_shutdown.clone());

            let mut state = self.state.lock();
            let info = &mut state.channels[channel.index()];
            info.udp = Some(UdpChannel {
                socket: rtp,
                worker: rtp_worker,
                peer_rtp: SocketAddr::new(self.peer_addr.ip(), client_rtp_port),
                local_rtp_port: rtp_port,
                local_rtcp_port: rtcp_port,
            });
            info.is_setup = true;
            state.mode = Some(TransportMode::Udp);

            tracing::debug!(
                peer = %self.peer_addr,
                %channel,
                client_rtp_port,
                client_rtcp_port,
                rtp_port,
                rtcp_port,
                "RTP over UDP set up"
            );
            return Ok((rtp_port, rtcp_port));
        }

        tracing::warn!(peer = %self.peer_addr, %channel, attempts, "no UDP port pair available");
        Err(RtspError::PortRangeExhausted { attempts })
    }

    pub fn setup_tcp(&self, channel: MediaChannelId, rtp_channel: u8, rtcp_channel: u8) {
        let mut state = self.state.lock();
        let info = &mut state.channels[channel.index()];
        info.rtp_channel = rtp_channel;
        info.rtcp_channel = rtcp_channel;
        info.is_setup = true;
        state.mode = Some(TransportMode::Interleaved);

        tracing::debug!(peer = %self.peer_addr, %channel, rtp_channel, rtcp_channel, "RTP over TCP set up");
    }

    /// Arm every channel that has been set up.
    pub fn play(&self) {
        let mut state = self.state.lock();
        for info in state.channels.iter_mut().filter(|info| info.is_setup) {
            info.is_play = true;
        }
    }

    /// Arm every channel that has been set up, as a recording client.
    /// Gating and delivery match [`play`](Self::play); the RTSP handler only
    /// issues `play`, so this is for embedders driving the connection
    /// directly.
    pub fn record(&self) {
        let mut state = self.state.lock();
        for info in state.channels.iter_mut().filter(|info| info.is_setup) {
            info.is_record = true;
        }
    }

    /// Stop delivery for good. Idempotent.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for info in state.channels.iter_mut() {
            info.is_play = false;
            info.is_record = false;
        }
        drop(state);

        self.rtcp_shutdown.cancel();
        tracing::debug!(peer = %self.peer_addr, session = self.session_id, "RTP connection torn down");
    }

    /// Stamp and transmit one packet on `channel`.
    ///
    /// Returns `Ok(false)` when the packet is held back: channel not armed
    /// or no keyframe seen yet. UDP sends complete asynchronously on the
    /// socket's worker and tear the connection down on failure. Interleaved
    /// packets are framed and handed to the logic queue, which appends them
    /// to the RTSP connection's outbound queue.
    pub fn send_rtp_packet(
        self: &Arc<Self>,
        channel: MediaChannelId,
        mut packet: RtpPacket,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RtspError::ConnectionClosed);
        }
        if !state.stamp(channel, &mut packet) {
            return Ok(false);
        }

        match state.mode {
            Some(TransportMode::Udp) => {
                let Some(udp) = state.channels[channel.index()].udp.as_ref() else {
                    return Ok(false);
                };
                let socket = udp.socket.clone();
                let worker = udp.worker.clone();
                let dest = udp.peer_rtp;
                drop(state);

                let datagram = packet.into_bytes().freeze().slice(RTP_TCP_HEAD_SIZE..);
                let this = self.clone();
                worker.spawn(async move {
                    if let Err(e) = socket.send_to(&datagram, dest).await {
                        tracing::warn!(peer = %dest, error = %e, "RTP send failed");
                        this.teardown();
                    }
                });
                Ok(true)
            }
            Some(TransportMode::Interleaved) => {
                let rtp_channel = state.channels[channel.index()].rtp_channel;
                drop(state);

                let Some(conn) = self.rtsp.upgrade() else {
                    return Err(RtspError::ConnectionClosed);
                };
                let len = (packet.size() - RTP_TCP_HEAD_SIZE) as u16;
                let prefix = packet.prefix_mut();
                prefix[0] = b'$';
                prefix[1] = rtp_channel;
                prefix[2..4].copy_from_slice(&len.to_be_bytes());

                let frame: Bytes = packet.into_bytes().freeze();
                if !self.logic.push(LogicMessage::rtp_packet(conn, frame)) {
                    return Err(RtspError::ConnectionClosed);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for RtpConnection {
    fn drop(&mut self) {
        self.rtcp_shutdown.cancel();
    }
}

/// Keep a receive armed on the RTCP socket. Reports are read and dropped.
fn spawn_rtcp_reader(
    worker: &IoWorker,
    socket: tokio::net::UdpSocket,
    channel: MediaChannelId,
    shutdown: CancellationToken,
) {
    worker.spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => tracing::trace!(%channel, %from, bytes = n, "RTCP received"),
                    Err(e) => {
                        tracing::debug!(%channel, error = %e, "RTCP read failed");
                        break;
                    }
                },
            }
        }
    });
}
