//! Media sources and RTP packetization.
//!
//! A [`MediaSource`] turns one encoded access unit ([`AVFrame`]) into one or
//! more [`RtpPacket`]s and hands each one to the send callback the owning
//! [`MediaSession`](crate::session::MediaSession) installed. Packets leave
//! the source with the RTP header region blank: sequence number, SSRC and
//! marker bit are stamped later, per client, by
//! [`RtpConnection`](crate::transport::RtpConnection).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Status |
//! |-------|--------|-----|--------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Implemented |
//! | PCMA / AAC | n/a | RFC 3551 / RFC 3640 | Declared in [`MediaType`] only |

pub mod frame;
pub mod h264;
pub mod rtp;

pub use frame::{AVFrame, FrameType, MAX_MEDIA_CHANNEL, MediaChannelId, MediaType};
pub use rtp::{MAX_RTP_PAYLOAD_SIZE, RtpHeader, RtpPacket};

use crate::error::Result;

/// Receives every packet a source emits. An `Err` stops the current frame.
pub type SendFrameCallback = Box<dyn FnMut(MediaChannelId, RtpPacket) -> Result<()> + Send>;

/// Codec-specific RTP packetizer attached to one session channel.
pub trait MediaSource: Send {
    fn media_type(&self) -> MediaType;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8 {
        self.media_type().payload_type()
    }

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// SDP `m=` line for this source.
    fn describe(&self, port: u16) -> String;

    /// SDP media-level attribute lines (CRLF-joined, no trailing CRLF).
    fn attribute(&self) -> String;

    fn set_send_frame_callback(&mut self, callback: SendFrameCallback);

    /// Packetize one access unit and push every packet through the callback.
    fn handle_frame(&mut self, channel: MediaChannelId, frame: AVFrame) -> Result<()>;
}
