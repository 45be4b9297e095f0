//! Live RTSP/RTP H.264 streaming server.
//!
//! Register a [`MediaSession`] per stream, attach an [`H264Source`], push
//! encoded frames with [`RtspServer::push_frame`], and clients connecting to
//! `rtsp://host:port/<suffix>` receive them over UDP or TCP-interleaved RTP.

pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use error::{ParseErrorKind, Result, RtspError};
pub use media::h264::H264Source;
pub use media::{AVFrame, FrameType, MediaChannelId, MediaSource, MediaType};
pub use server::RtspServer;
pub use session::{MediaSession, MediaSessionId, SessionRegistry};
