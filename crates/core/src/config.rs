use std::ops::RangeInclusive;
use std::thread;

/// Default RTSP listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8554";

/// Size of the single buffered read a request must fit in.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Server-level configuration, injected into every layer at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTSP listener binds to (`host:port`).
    pub bind_addr: String,
    /// Number of I/O event-loop workers. Each runs on its own thread.
    pub io_workers: usize,
    /// SDP session name. When non-empty, the SDP also advertises
    /// `a=type:broadcast` and `a=rtcp-unicast:reflection`.
    pub sdp_session_name: String,
    /// Bytes requested per socket read; one read carries one request.
    pub read_buffer_size: usize,
    /// How many random port pairs SETUP tries before answering 500.
    pub udp_bind_attempts: u32,
    /// Range server-side RTP ports are drawn from. RTP ports are even,
    /// RTCP uses `rtp + 1`.
    pub udp_port_range: RangeInclusive<u16>,
    /// Maximum messages pending on one connection's outbound queue.
    pub send_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            io_workers: default_io_workers(),
            sdp_session_name: String::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            udp_bind_attempts: 10,
            udp_port_range: 5000..=65534,
            send_queue_capacity: 1024,
        }
    }
}

/// Available hardware parallelism, falling back to a single worker.
pub fn default_io_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
