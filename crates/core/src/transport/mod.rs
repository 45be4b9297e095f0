//! Client-facing transport: RTSP control connections and RTP delivery.
//!
//! - [`RtspConnection`]: one TCP control socket, its request handling and
//!   an ordered, bounded outbound queue.
//! - [`RtpConnection`]: the client's RTP state, delivering over UDP or
//!   interleaved in the control socket.

pub mod rtp_connection;
pub mod rtsp_connection;
pub mod send_queue;

pub use rtp_connection::{RtpConnection, TransportMode};
pub use rtsp_connection::{LogicMessage, MessageKind, ProtocolContext, RtspConnection};
pub use send_queue::{Outbound, OutboundKind, SendQueue};
