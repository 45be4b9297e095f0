//! Media sessions: named streams and the registry that serves them.
//!
//! A [`MediaSession`] is one stream addressed by its URL suffix
//! (`rtsp://host:port/<suffix>`). It owns up to [`MAX_MEDIA_CHANNEL`] media
//! sources and a list of weak client references. Every packet a source
//! emits is fanned out to the live clients; dropped clients are pruned the
//! next time a packet goes out, and clients that disconnect cleanly are
//! removed right away.
//!
//! ```text
//! producer ──AVFrame──▶ MediaSession::handle_frame
//!                          └─▶ MediaSource::handle_frame (packetize)
//!                                └─▶ send callback ──▶ RtpConnection × N
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::{AVFrame, MAX_MEDIA_CHANNEL, MediaChannelId, MediaSource, RtpPacket};
use crate::protocol::sdp::{MediaDescription, SessionDescription};
use crate::transport::RtpConnection;

static LAST_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique media session id. The first session created gets `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaSessionId(u32);

impl MediaSessionId {
    fn next() -> Self {
        Self(LAST_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MediaSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoked with the session id and the client's RTSP peer address.
pub type ClientCallback = Arc<dyn Fn(MediaSessionId, IpAddr, u16) + Send + Sync>;

type ClientList = Arc<Mutex<Vec<Weak<RtpConnection>>>>;

/// One named stream.
pub struct MediaSession {
    id: MediaSessionId,
    suffix: String,
    sources: Mutex<[Option<Box<dyn MediaSource>>; MAX_MEDIA_CHANNEL]>,
    sdp: Mutex<Option<String>>,
    clients: ClientList,
    on_connect: Mutex<Vec<ClientCallback>>,
    on_disconnect: Mutex<Vec<ClientCallback>>,
}

impl MediaSession {
    pub fn new(suffix: &str) -> Self {
        Self {
            id: MediaSessionId::next(),
            suffix: suffix.to_string(),
            sources: Mutex::new([None, None]),
            sdp: Mutex::new(None),
            clients: Arc::new(Mutex::new(Vec::new())),
            on_connect: Mutex::new(Vec::new()),
            on_disconnect: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> MediaSessionId {
        self.id
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Install `source` on `channel`, replacing any previous one.
    ///
    /// The source's send callback fans each packet out to the current
    /// clients. Every client stamps its own RTP header into the buffer, so
    /// each recipient gets its own copy; the last one takes the original.
    /// Delivery to one client never depends on another: a failing client
    /// is logged and skipped, so the callback itself always succeeds.
    pub fn add_source(&self, channel: MediaChannelId, mut source: Box<dyn MediaSource>) {
        let clients = self.clients.clone();
        let session = self.id;
        source.set_send_frame_callback(Box::new(move |channel, packet: RtpPacket| {
            let recipients: Vec<Arc<RtpConnection>> = {
                let mut list = clients.lock();
                let mut live = Vec::with_capacity(list.len());
                list.retain(|weak| match weak.upgrade() {
                    Some(client) => {
                        live.push(client);
                        true
                    }
                    None => false,
                });
                live
            };

            let deliver = |client: &Arc<RtpConnection>, packet: RtpPacket| {
                if let Err(e) = client.send_rtp_packet(channel, packet) {
                    tracing::trace!(
                        %session,
                        rtp_session = client.session_id(),
                        peer = %client.peer_addr(),
                        error = %e,
                        "packet not delivered"
                    );
                }
            };
            if let Some((last, rest)) = recipients.split_last() {
                for client in rest {
                    deliver(client, packet.clone());
                }
                deliver(last, packet);
            }
            Ok(())
        }));

        tracing::debug!(session = %self.id, %channel, media = ?source.media_type(), "media source added");
        self.sources.lock()[channel.index()] = Some(source);
    }

    pub fn remove_source(&self, channel: MediaChannelId) -> Option<Box<dyn MediaSource>> {
        self.sources.lock()[channel.index()].take()
    }

    pub fn has_source(&self, channel: MediaChannelId) -> bool {
        self.sources.lock()[channel.index()].is_some()
    }

    /// Clock rate and payload type of the source on `channel`.
    pub fn source_params(&self, channel: MediaChannelId) -> Option<(u32, u8)> {
        self.sources.lock()[channel.index()]
            .as_ref()
            .map(|source| (source.clock_rate(), source.payload_type()))
    }

    /// Packetize `frame` on `channel` and fan the packets out.
    pub fn handle_frame(&self, channel: MediaChannelId, frame: AVFrame) -> Result<()> {
        let mut sources = self.sources.lock();
        match sources[channel.index()].as_mut() {
            Some(source) => source.handle_frame(channel, frame),
            None => Err(RtspError::ChannelWithoutSource(channel.index() as u8)),
        }
    }

    /// SDP for DESCRIBE, built on first use and reused afterwards.
    pub fn get_sdp_message(&self, ip: IpAddr, session_name: &str) -> Result<String> {
        let mut memo = self.sdp.lock();
        if let Some(sdp) = memo.as_ref() {
            return Ok(sdp.clone());
        }

        let mut desc = SessionDescription::new(ip, session_name);
        {
            let sources = self.sources.lock();
            for channel in MediaChannelId::ALL {
                if let Some(source) = sources[channel.index()].as_ref() {
                    desc.add_media(MediaDescription {
                        channel,
                        media_line: source.describe(0),
                        attributes: source.attribute(),
                    });
                }
            }
        }
        if desc.is_empty() {
            return Err(RtspError::NoMediaSource(self.id));
        }

        let sdp = desc.render();
        *memo = Some(sdp.clone());
        Ok(sdp)
    }

    /// Register a client. Returns `false` if it is already present.
    pub fn add_client(&self, client: &Arc<RtpConnection>) -> bool {
        {
            let mut list = self.clients.lock();
            if list.iter().any(|weak| weak.as_ptr() == Arc::as_ptr(client)) {
                return false;
            }
            list.push(Arc::downgrade(client));
        }

        let peer = client.peer_addr();
        tracing::info!(session = %self.id, %peer, "client joined session");
        let callbacks = self.on_connect.lock().clone();
        for callback in callbacks {
            callback(self.id, peer.ip(), peer.port());
        }
        true
    }

    /// Unregister a client. Returns `false` if it was not present.
    pub fn remove_client(&self, client: &Arc<RtpConnection>) -> bool {
        {
            let mut list = self.clients.lock();
            let Some(pos) = list
                .iter()
                .position(|weak| weak.as_ptr() == Arc::as_ptr(client))
            else {
                return false;
            };
            list.remove(pos);
        }

        let peer = client.peer_addr();
        tracing::info!(session = %self.id, %peer, "client left session");
        let callbacks = self.on_disconnect.lock().clone();
        for callback in callbacks {
            callback(self.id, peer.ip(), peer.port());
        }
        true
    }

    /// Live clients only; expired entries are not counted.
    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn on_client_connect<F>(&self, callback: F)
    where
        F: Fn(MediaSessionId, IpAddr, u16) + Send + Sync + 'static,
    {
        self.on_connect.lock().push(Arc::new(callback));
    }

    pub fn on_client_disconnect<F>(&self, callback: F)
    where
        F: Fn(MediaSessionId, IpAddr, u16) + Send + Sync + 'static,
    {
        self.on_disconnect.lock().push(Arc::new(callback));
    }
}

impl fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSession")
            .field("id", &self.id)
            .field("suffix", &self.suffix)
            .field("clients", &self.client_count())
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<MediaSessionId, Arc<MediaSession>>,
    by_suffix: HashMap<String, MediaSessionId>,
}

/// Sessions indexed by id and by URL suffix, kept consistent under one lock.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<MediaSession>) -> Result<MediaSessionId> {
        let mut inner = self.inner.lock();
        if inner.by_suffix.contains_key(session.suffix()) {
            return Err(RtspError::DuplicateSuffix(session.suffix().to_string()));
        }
        let id = session.id();
        inner.by_suffix.insert(session.suffix().to_string(), id);
        inner.by_id.insert(id, session);
        Ok(id)
    }

    pub fn remove(&self, id: MediaSessionId) -> Option<Arc<MediaSession>> {
        let mut inner = self.inner.lock();
        let session = inner.by_id.remove(&id)?;
        inner.by_suffix.remove(session.suffix());
        Some(session)
    }

    pub fn find(&self, id: MediaSessionId) -> Option<Arc<MediaSession>> {
        self.inner.lock().by_id.get(&id).cloned()
    }

    pub fn find_by_suffix(&self, suffix: &str) -> Option<Arc<MediaSession>> {
        let inner = self.inner.lock();
        let id = inner.by_suffix.get(suffix)?;
        inner.by_id.get(id).cloned()
    }

    /// Like [`find_by_suffix`](Self::find_by_suffix), failing with
    /// [`RtspError::StreamNotFound`].
    pub fn get_by_suffix(&self, suffix: &str) -> Result<Arc<MediaSession>> {
        self.find_by_suffix(suffix)
            .ok_or_else(|| RtspError::StreamNotFound(suffix.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }
}
