use crate::error::RtspError;

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format, headers in insertion order:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Length: 142\r\n
/// Content-Type: application/sdp\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_sdp`](Self::with_sdp), then call [`serialize`](Self::serialize).
/// The per-method constructors below produce the exact byte layout clients
/// of this server see.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Methods advertised in the OPTIONS `Public` header.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY";

/// Session timeout advertised on PLAY (RFC 2326 §12.37). Not enforced.
pub const SESSION_TIMEOUT_SECS: u32 = 60;

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str, cseq: u32) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
            body: None,
        }
    }

    /// 200 OK: success (RFC 2326 §7.1.1).
    pub fn ok(cseq: u32) -> Self {
        Self::new(200, "OK", cseq)
    }

    /// 404: no media session registered for the requested suffix.
    pub fn stream_not_found(cseq: u32) -> Self {
        Self::new(404, "Stream Not Found", cseq)
    }

    /// 500: session lookup, SDP or transport setup failed.
    pub fn internal_error(cseq: u32) -> Self {
        Self::new(500, "Internal Server Error", cseq)
    }

    /// Response for a failed request: 404 for an unknown stream, 500 for
    /// everything else.
    pub fn from_error(cseq: u32, error: &RtspError) -> Self {
        match error {
            RtspError::StreamNotFound(_) => Self::stream_not_found(cseq),
            _ => Self::internal_error(cseq),
        }
    }

    pub fn options(cseq: u32) -> Self {
        Self::ok(cseq).add_header("Public", PUBLIC_METHODS)
    }

    pub fn describe(cseq: u32, sdp: String) -> Self {
        Self::ok(cseq).with_sdp(sdp)
    }

    pub fn setup_interleaved(cseq: u32, rtp_channel: u8, rtcp_channel: u8, session: u32) -> Self {
        Self::ok(cseq)
            .add_header(
                "Transport",
                &format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
            )
            .add_header("Session", &session.to_string())
    }

    pub fn setup_udp(
        cseq: u32,
        client_ports: (u16, u16),
        server_ports: (u16, u16),
        session: u32,
    ) -> Self {
        Self::ok(cseq)
            .add_header(
                "Transport",
                &format!(
                    "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                    client_ports.0, client_ports.1, server_ports.0, server_ports.1
                ),
            )
            .add_header("Session", &session.to_string())
    }

    pub fn play(cseq: u32, session: u32) -> Self {
        Self::ok(cseq)
            .add_header("Range", "npt=0.00-")
            .add_header("Session", &format!("{session};timeout={SESSION_TIMEOUT_SECS}"))
    }

    pub fn teardown(cseq: u32, session: u32) -> Self {
        Self::ok(cseq).add_header("Session", &session.to_string())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach an SDP body; `Content-Length` precedes `Content-Type`.
    pub fn with_sdp(mut self, sdp: String) -> Self {
        self.headers
            .push(("Content-Length".to_string(), sdp.len().to_string()));
        self.headers
            .push(("Content-Type".to_string(), "application/sdp".to_string()));
        self.body = Some(sdp);
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        response.push_str("\r\n");

        if let Some(body) = &self.body {
            response.push_str(body);
        }
        response
    }
}
