use std::fmt;

/// Number of media channels a session can carry.
pub const MAX_MEDIA_CHANNEL: usize = 2;

/// Fixed media channel of a session: video on 0, audio on 1.
///
/// SETUP picks the channel from the request URL: a URL containing
/// `track1` addresses [`Channel1`](Self::Channel1), anything else
/// [`Channel0`](Self::Channel0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaChannelId {
    Channel0 = 0,
    Channel1 = 1,
}

impl MediaChannelId {
    pub const ALL: [MediaChannelId; MAX_MEDIA_CHANNEL] =
        [MediaChannelId::Channel0, MediaChannelId::Channel1];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MediaChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Codec carried by a media source. Only H.264 has a packetizer; the audio
/// types are declared for SDP/payload bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pcma,
    H264,
    Aac,
}

impl MediaType {
    /// Static or conventional RTP payload type for the codec.
    pub fn payload_type(self) -> u8 {
        match self {
            Self::Pcma => 8,
            Self::H264 => 96,
            Self::Aac => 37,
        }
    }
}

/// Kind of access unit a producer pushes.
///
/// `Unspecified` (wire value 0) is treated like an I-frame for keyframe
/// gating, so producers that never classify frames still stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Unspecified,
    VideoI,
    VideoP,
    VideoB,
    Audio,
}

impl FrameType {
    pub fn is_key(self) -> bool {
        matches!(self, Self::Unspecified | Self::VideoI)
    }
}

/// One encoded access unit handed to a media source.
#[derive(Debug, Clone, Default)]
pub struct AVFrame {
    pub buffer: Vec<u8>,
    pub frame_type: FrameType,
    /// 90 kHz RTP timestamp. Zero means "stamp with the current time".
    pub timestamp: u32,
}

impl AVFrame {
    pub fn new(buffer: Vec<u8>, frame_type: FrameType) -> Self {
        Self {
            buffer,
            frame_type,
            timestamp: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}
