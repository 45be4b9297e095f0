//! Error types for the live RTSP server.

use std::fmt;

use crate::session::MediaSessionId;

/// Errors that can occur in the live RTSP server.
///
/// Variants map to the failure modes of each layer:
///
/// - **Protocol**: [`Parse`](Self::Parse), dropped without a response.
/// - **Lookup**: [`StreamNotFound`](Self::StreamNotFound),
///   [`SessionNotFound`](Self::SessionNotFound), answered with 404 / 500.
/// - **Transport**: [`Io`](Self::Io), [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`ConnectionClosed`](Self::ConnectionClosed).
/// - **Media**: [`NoMediaSource`](Self::NoMediaSource), [`ChannelWithoutSource`](Self::ChannelWithoutSource),
///   [`SendAborted`](Self::SendAborted).
/// - **Registry**: [`DuplicateSuffix`](Self::DuplicateSuffix).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// No media session is registered under the requested URL suffix.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// No media session with the given id exists in the registry.
    #[error("media session not found: {0}")]
    SessionNotFound(MediaSessionId),

    /// A media session with the same URL suffix is already registered.
    #[error("a media session is already registered for suffix {0:?}")]
    DuplicateSuffix(String),

    /// The session has no source on any channel, so no SDP can be built.
    #[error("media session {0} has no media source")]
    NoMediaSource(MediaSessionId),

    /// No channel source is installed for the pushed frame.
    #[error("no media source on channel {0}")]
    ChannelWithoutSource(u8),

    /// No free UDP port pair could be bound within the configured attempts.
    #[error("no UDP port pair could be bound after {attempts} attempts")]
    PortRangeExhausted { attempts: u32 },

    /// The RTP or RTSP connection has been closed or dropped.
    #[error("connection closed")]
    ConnectionClosed,

    /// The send callback refused a packet; fragmentation stopped.
    #[error("packet send aborted on channel {0}")]
    SendAborted(u8),
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty or had no CRLF-terminated request line.
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Request-URI was not `rtsp://host[:port]/suffix`.
    InvalidUrl,
    /// Method is not one the server understands.
    UnsupportedMethod,
    /// No `CSeq` in the request and none cached for the connection.
    MissingCSeq,
    /// DESCRIBE without `Accept` / `sdp`.
    MissingAccept,
    /// SETUP without a usable `Transport` header.
    InvalidTransport,
    /// PLAY with a non-numeric `Session` header.
    InvalidSession,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidUrl => write!(f, "invalid request url"),
            Self::UnsupportedMethod => write!(f, "unsupported method"),
            Self::MissingCSeq => write!(f, "missing CSeq"),
            Self::MissingAccept => write!(f, "missing Accept: application/sdp"),
            Self::InvalidTransport => write!(f, "invalid Transport header"),
            Self::InvalidSession => write!(f, "invalid Session header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
