use bytes::{BufMut, BytesMut};
use rand::RngExt;

use super::frame::FrameType;

pub const RTP_VERSION: u8 = 2;
/// Fixed RTP header size (RFC 3550 §5.1), no CSRCs or extensions.
pub const RTP_HEADER_SIZE: usize = 12;
/// Interleaved framing prefix: `$`, channel, 16-bit length.
pub const RTP_TCP_HEAD_SIZE: usize = 4;
/// Largest RTP payload the packetizer emits.
pub const MAX_RTP_PAYLOAD_SIZE: usize = 1420;
/// Offset of the payload inside an [`RtpPacket`] buffer.
pub const RTP_PAYLOAD_OFFSET: usize = RTP_TCP_HEAD_SIZE + RTP_HEADER_SIZE;

/// Per-channel RTP fixed header template (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Each client connection owns one template per channel. The timestamp comes
/// from the packet (the packetizer assigns it per access unit); sequence
/// number and SSRC are client-local, randomly seeded.
#[derive(Debug, Clone)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32, sequence: u16) -> Self {
        Self { pt, ssrc, sequence }
    }

    /// Random SSRC and initial sequence number, per RFC 3550 §5.1 / §8.1.
    pub fn with_random_state(pt: u8) -> Self {
        let mut rng = rand::rng();
        Self::new(pt, rng.random::<u32>(), rng.random::<u16>())
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Serialize the 12-byte header into `dst` and post-increment the
    /// sequence number.
    pub fn write(&mut self, marker: bool, timestamp: u32, dst: &mut [u8]) {
        dst[0] = RTP_VERSION << 6;
        dst[1] = ((marker as u8) << 7) | (self.pt & 0x7f);
        dst[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        dst[4..8].copy_from_slice(&timestamp.to_be_bytes());
        dst[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// A wire-ready RTP datagram with room for the interleaved prefix.
///
/// ```text
/// [0..4)   interleaved prefix, filled only for RTP/AVP/TCP
/// [4..16)  RTP fixed header, stamped per client
/// [16..)   payload (FU indicator + FU header + fragment, or a whole NAL)
/// ```
#[derive(Debug, Clone)]
pub struct RtpPacket {
    data: BytesMut,
    pub frame_type: FrameType,
    pub timestamp: u32,
    /// Last packet of the access unit; becomes the RTP marker bit.
    pub last: bool,
}

impl RtpPacket {
    /// Build a packet whose payload is `prefix` followed by `payload`.
    pub fn new(
        frame_type: FrameType,
        timestamp: u32,
        last: bool,
        prefix: &[u8],
        payload: &[u8],
    ) -> Self {
        let mut data = BytesMut::with_capacity(RTP_PAYLOAD_OFFSET + prefix.len() + payload.len());
        data.put_bytes(0, RTP_PAYLOAD_OFFSET);
        data.put_slice(prefix);
        data.put_slice(payload);
        Self {
            data,
            frame_type,
            timestamp,
            last,
        }
    }

    /// Total buffer size including the reserved prefix and header regions.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[RTP_PAYLOAD_OFFSET..]
    }

    /// RTP header plus payload, i.e. what goes into a UDP datagram.
    pub fn rtp_bytes(&self) -> &[u8] {
        &self.data[RTP_TCP_HEAD_SIZE..]
    }

    pub(crate) fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[RTP_TCP_HEAD_SIZE..RTP_PAYLOAD_OFFSET]
    }

    pub(crate) fn prefix_mut(&mut self) -> &mut [u8] {
        &mut self.data[..RTP_TCP_HEAD_SIZE]
    }

    pub(crate) fn into_bytes(self) -> BytesMut {
        self.data
    }
}
