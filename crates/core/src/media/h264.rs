use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{MAX_RTP_PAYLOAD_SIZE, RtpPacket};
use super::{AVFrame, FrameType, MediaChannelId, MediaSource, MediaType, SendFrameCallback};
use crate::error::Result;

/// 90 kHz clock rate per RFC 6184 §8.1.
pub const H264_CLOCK_RATE: u32 = 90000;

const FU_A_TYPE: u8 = 28;
const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// H.264 media source (RFC 6184).
///
/// Each pushed [`AVFrame`] holds one NAL unit without its Annex B start
/// code. Two packetization modes are used:
///
/// - **Single NAL Unit** (§5.6): units up to [`MAX_RTP_PAYLOAD_SIZE`] bytes
///   go out whole in one packet with the marker bit set.
///
/// - **FU-A Fragmentation** (§5.8): larger units lose their NAL header
///   byte and are split into `MAX_RTP_PAYLOAD_SIZE - 2` byte fragments,
///   each preceded by:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   ```
///
///   S is set on the first fragment only, E and the marker on the last only.
///
/// SPS/PPS are captured from the frames that carry them (or supplied up
/// front with [`with_parameter_sets`](Self::with_parameter_sets)) and
/// advertised in the `a=fmtp` line.
pub struct H264Source {
    framerate: u32,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    send_frame: Option<SendFrameCallback>,
}

impl H264Source {
    pub fn new(framerate: u32) -> Self {
        Self {
            framerate,
            sps: None,
            pps: None,
            send_frame: None,
        }
    }

    pub fn with_parameter_sets(mut self, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        self.sps = Some(sps);
        self.pps = Some(pps);
        self
    }

    pub fn framerate(&self) -> u32 {
        self.framerate
    }

    /// RTP timestamp advance between consecutive frames at this framerate.
    pub fn frame_ticks(&self) -> u32 {
        H264_CLOCK_RATE / self.framerate.max(1)
    }

    /// Wall-clock spacing between consecutive frames at this framerate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.framerate.max(1)
    }

    /// Current wall clock on the 90 kHz RTP scale, with half-millisecond
    /// rounding: `((now_us + 500) / 1000) * 90`.
    pub fn timestamp_now() -> u32 {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        ((micros + 500) / 1000).wrapping_mul(90) as u32
    }

    /// profile-level-id from the SPS (RFC 6184 §8.1): bytes 1–3 are
    /// profile_idc, constraint flags, level_idc.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    fn capture_parameter_set(&mut self, nal: &[u8]) {
        let Some(&header) = nal.first() else {
            return;
        };
        match header & 0x1f {
            NAL_TYPE_SPS if self.sps.is_none() => {
                tracing::debug!(bytes = nal.len(), "H.264 SPS captured from stream");
                self.sps = Some(nal.to_vec());
            }
            NAL_TYPE_PPS if self.pps.is_none() => {
                tracing::debug!(bytes = nal.len(), "H.264 PPS captured from stream");
                self.pps = Some(nal.to_vec());
            }
            _ => {}
        }
    }

    fn emit(&mut self, channel: MediaChannelId, packet: RtpPacket) -> Result<()> {
        match self.send_frame.as_mut() {
            Some(send) => send(channel, packet),
            None => Ok(()),
        }
    }
}

impl MediaSource for H264Source {
    fn media_type(&self) -> MediaType {
        MediaType::H264
    }

    fn clock_rate(&self) -> u32 {
        H264_CLOCK_RATE
    }

    fn describe(&self, port: u16) -> String {
        format!("m=video {} RTP/AVP {}", port, self.payload_type())
    }

    /// `a=rtpmap` first; `a=fmtp` references the payload type it defines.
    fn attribute(&self) -> String {
        let pt = self.payload_type();
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", pt);
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={}", pl));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
        }
        format!("a=rtpmap:{} H264/{}\r\n{}", pt, H264_CLOCK_RATE, fmtp)
    }

    fn set_send_frame_callback(&mut self, callback: SendFrameCallback) {
        self.send_frame = Some(callback);
    }

    fn handle_frame(&mut self, channel: MediaChannelId, mut frame: AVFrame) -> Result<()> {
        if frame.timestamp == 0 {
            frame.timestamp = Self::timestamp_now();
        }
        self.capture_parameter_set(&frame.buffer);

        let nal = frame.buffer.as_slice();
        if nal.len() <= MAX_RTP_PAYLOAD_SIZE {
            let packet = RtpPacket::new(frame.frame_type, frame.timestamp, true, &[], nal);
            return self.emit(channel, packet);
        }

        let fu_indicator = (nal[0] & 0xe0) | FU_A_TYPE;
        let nal_type = nal[0] & 0x1f;
        let fragments = nal[1..].chunks(MAX_RTP_PAYLOAD_SIZE - 2);
        let count = fragments.len();

        for (i, fragment) in fragments.enumerate() {
            let first = i == 0;
            let last = i + 1 == count;
            let mut fu_header = nal_type;
            if first {
                fu_header |= FU_START;
            }
            if last {
                fu_header |= FU_END;
            }
            let packet = RtpPacket::new(
                frame.frame_type,
                frame.timestamp,
                last,
                &[fu_indicator, fu_header],
                fragment,
            );
            self.emit(channel, packet)?;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments = count,
            "FU-A fragmented NAL unit"
        );
        Ok(())
    }
}

/// Split an H.264 Annex B bitstream into NAL units.
///
/// Handles both 4-byte `00 00 00 01` and 3-byte `00 00 01` start codes and
/// returns the bytes between them, start codes excluded.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        if data[i..].starts_with(&[0, 0, 0, 1]) {
            starts.push((i + 4, 4));
            i += 4;
        } else if data[i..].starts_with(&[0, 0, 1]) {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(idx, &(start, _))| {
            let end = match starts.get(idx + 1) {
                Some(&(next_start, next_len)) => next_start - next_len,
                None => data.len(),
            };
            (start < end).then(|| &data[start..end])
        })
        .collect()
}

/// Best-effort frame classification for producers: IDR slices and
/// parameter sets open a decodable point.
pub fn frame_type_of(nal: &[u8]) -> FrameType {
    match nal.first().map(|b| b & 0x1f) {
        Some(5) | Some(NAL_TYPE_SPS) | Some(NAL_TYPE_PPS) => FrameType::VideoI,
        _ => FrameType::VideoP,
    }
}
