//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: parsing
//! requests, building responses, and generating SDP. The per-connection
//! state machine that ties them together lives in
//! [`transport::rtsp_connection`](crate::transport::rtsp_connection).
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport (UDP ports or interleaved channels) |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Stop media delivery |
//! | GET_PARAMETER | §10.8 | Keepalive |
//!
//! ## Connection states
//!
//! ```text
//! StartConnect ──PLAY──▶ StartPlay
//! ```

pub mod request;
pub mod response;
pub mod sdp;

pub use request::{Method, RtspRequest, TransportRequest};
pub use response::RtspResponse;
pub use sdp::{MediaDescription, SessionDescription};

/// Connection-level protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    StartConnect,
    StartPlay,
}
