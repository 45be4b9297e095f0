use std::fmt;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::MediaChannelId;

/// Port assumed when the request URL carries none.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// RTSP methods the server recognizes.
///
/// `Rtcp` is not a method on the wire: a read whose first byte is `$` is an
/// interleaved RTCP frame sharing the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
    GetParameter,
    Rtcp,
}

impl Method {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "OPTIONS" => Some(Self::Options),
            "DESCRIBE" => Some(Self::Describe),
            "SETUP" => Some(Self::Setup),
            "PLAY" => Some(Self::Play),
            "TEARDOWN" => Some(Self::Teardown),
            "GET_PARAMETER" => Some(Self::GetParameter),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Rtcp => "RTCP",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport requested in a SETUP `Transport` header (RFC 2326 §12.39).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRequest {
    /// `RTP/AVP/TCP;unicast;interleaved=<rtp>-<rtcp>`
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// `RTP/AVP;unicast;client_port=<rtp>-<rtcp>`
    Udp { rtp_port: u16, rtcp_port: u16 },
}

/// A parsed RTSP request (RFC 2326 §6).
///
/// The request line is tokenized; the header block is not. It is kept as one
/// text blob and the handful of values the server needs (`CSeq`,
/// `Transport`, `Accept`, `Session`) are located by keyword search. Headers
/// the server does not look for are never examined, and a request must fit
/// in a single socket read.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    /// Full request URL as sent.
    pub url: String,
    pub host: String,
    pub port: u16,
    /// Everything after the first `/` following the host, e.g. `live` or
    /// `live/track1`.
    pub suffix: String,
    pub version: String,
    pub cseq: u32,
    /// Channel addressed by SETUP: `track1` in the URL selects channel 1.
    pub channel: MediaChannelId,
    pub transport: Option<TransportRequest>,
    /// Numeric `Session` header on PLAY, if present.
    pub session: Option<u32>,
}

impl RtspRequest {
    /// Parse one buffered read.
    ///
    /// `cached_cseq` is the last CSeq seen on the connection; it is reused
    /// when the request carries none.
    pub fn parse(raw: &[u8], cached_cseq: Option<u32>) -> Result<Self> {
        if raw.first() == Some(&b'$') {
            return Ok(Self::rtcp(cached_cseq.unwrap_or_default()));
        }

        let text = String::from_utf8_lossy(raw);
        let (request_line, headers) = text
            .split_once("\r\n")
            .ok_or(RtspError::parse(ParseErrorKind::EmptyRequest))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(url), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        };
        let method =
            Method::from_token(method).ok_or(RtspError::parse(ParseErrorKind::UnsupportedMethod))?;
        let (host, port, suffix) = parse_url(url)?;

        let cseq = match number_after(headers, "CSeq") {
            Some(cseq) => cseq,
            None => cached_cseq.ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?,
        };

        let mut request = RtspRequest {
            method,
            url: url.to_string(),
            host,
            port,
            suffix,
            version: version.to_string(),
            cseq,
            channel: MediaChannelId::Channel0,
            transport: None,
            session: None,
        };

        match method {
            Method::Describe => {
                if find_keyword(headers, "Accept").is_none() || find_keyword(headers, "sdp").is_none()
                {
                    return Err(RtspError::parse(ParseErrorKind::MissingAccept));
                }
            }
            Method::Setup => {
                request.transport = Some(parse_transport(headers)?);
                if url.contains("track1") {
                    request.channel = MediaChannelId::Channel1;
                }
            }
            Method::Play => {
                if find_keyword(headers, "Session").is_some() {
                    let id = number_after(headers, "Session")
                        .ok_or(RtspError::parse(ParseErrorKind::InvalidSession))?;
                    request.session = Some(id);
                }
            }
            Method::Options | Method::Teardown | Method::GetParameter | Method::Rtcp => {}
        }

        Ok(request)
    }

    fn rtcp(cseq: u32) -> Self {
        RtspRequest {
            method: Method::Rtcp,
            url: String::new(),
            host: String::new(),
            port: 0,
            suffix: String::new(),
            version: String::new(),
            cseq,
            channel: MediaChannelId::Channel0,
            transport: None,
            session: None,
        }
    }
}

/// `rtsp://host[:port]/suffix` → (host, port, suffix).
fn parse_url(url: &str) -> Result<(String, u16, String)> {
    let invalid = || RtspError::parse(ParseErrorKind::InvalidUrl);

    let rest = url.strip_prefix("rtsp://").ok_or_else(invalid)?;
    let (authority, suffix) = rest.split_once('/').ok_or_else(invalid)?;
    let suffix = suffix.trim_end_matches('/');
    if authority.is_empty() || suffix.is_empty() {
        return Err(invalid());
    }

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (authority, DEFAULT_RTSP_PORT),
    };
    Ok((host.to_string(), port, suffix.to_string()))
}

fn parse_transport(headers: &str) -> Result<TransportRequest> {
    let invalid = || RtspError::parse(ParseErrorKind::InvalidTransport);

    let start = find_keyword(headers, "Transport").ok_or_else(invalid)?;
    let line = headers[start..].lines().next().unwrap_or_default();

    if line.contains("RTP/AVP/TCP") {
        let (rtp, rtcp) = pair_after(line, "interleaved=").ok_or_else(invalid)?;
        let rtp_channel = u8::try_from(rtp).map_err(|_| invalid())?;
        let rtcp_channel = u8::try_from(rtcp).map_err(|_| invalid())?;
        Ok(TransportRequest::Interleaved {
            rtp_channel,
            rtcp_channel,
        })
    } else if line.contains("RTP/AVP") && line.contains("unicast") {
        let (rtp, rtcp) = pair_after(line, "client_port=").ok_or_else(invalid)?;
        let rtp_port = u16::try_from(rtp).map_err(|_| invalid())?;
        let rtcp_port = u16::try_from(rtcp).map_err(|_| invalid())?;
        Ok(TransportRequest::Udp {
            rtp_port,
            rtcp_port,
        })
    } else {
        Err(invalid())
    }
}

/// ASCII case-insensitive substring search.
fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&keyword.to_ascii_lowercase())
}

/// Leading decimal digits of `s`, if any.
fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// `<keyword> : <digits>` → digits.
fn number_after(headers: &str, keyword: &str) -> Option<u32> {
    let start = find_keyword(headers, keyword)? + keyword.len();
    let rest = headers[start..].trim_start().strip_prefix(':')?;
    leading_number(rest.trim_start())
}

/// `<prefix><a>-<b>` → (a, b).
fn pair_after(line: &str, prefix: &str) -> Option<(u32, u32)> {
    let start = line.find(prefix)? + prefix.len();
    let (a, b) = line[start..].split_once('-')?;
    Some((leading_number(a)?, leading_number(b)?))
}
