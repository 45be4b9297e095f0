//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <sess-id> 1 IN IP4 <addr>                ← origin
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing (live stream)
//! a=control:*                                  ← aggregate control
//! a=type:broadcast                             ← only with a session name
//! a=rtcp-unicast:reflection                    ← only with a session name
//! m=video 0 RTP/AVP 96                         ← per channel: media line
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1               ← codec parameters
//! a=control:track0                             ← track control URL
//! ```

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::media::MediaChannelId;

/// One `m=` section: the source's media line and its attribute block.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub channel: MediaChannelId,
    pub media_line: String,
    /// CRLF-joined attribute lines, without trailing CRLF.
    pub attributes: String,
}

/// Session-level SDP builder.
#[derive(Debug, Clone)]
pub struct SessionDescription {
    origin: IpAddr,
    session_id: u64,
    session_name: String,
    media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Origin session id is derived from the wall clock, the way most
    /// servers fill `<sess-id>` (RFC 4566 §5.2 recommends an NTP timestamp).
    pub fn new(origin: IpAddr, session_name: &str) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            origin,
            session_id: epoch,
            session_name: session_name.to_string(),
            media: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn add_media(&mut self, media: MediaDescription) {
        self.media.push(media);
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn render(&self) -> String {
        let mut sdp: Vec<String> = Vec::new();

        sdp.push("v=0".to_string());
        sdp.push(format!("o=- {} 1 IN IP4 {}", self.session_id, self.origin));
        if self.session_name.is_empty() {
            sdp.push("s=-".to_string());
        } else {
            sdp.push(format!("s={}", self.session_name));
        }
        sdp.push("t=0 0".to_string());
        sdp.push("a=control:*".to_string());
        if !self.session_name.is_empty() {
            sdp.push("a=type:broadcast".to_string());
            sdp.push("a=rtcp-unicast:reflection".to_string());
        }

        for media in &self.media {
            sdp.push(media.media_line.clone());
            if !media.attributes.is_empty() {
                sdp.push(media.attributes.clone());
            }
            sdp.push(format!("a=control:track{}", media.channel));
        }

        tracing::debug!(media = self.media.len(), "SDP built");

        format!("{}\r\n", sdp.join("\r\n"))
    }
}
