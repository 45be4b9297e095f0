//! Integration tests: RTSP handshakes and RTP delivery over real sockets.
//!
//! Each test starts a server on an ephemeral local port, registers a `live`
//! H.264 session and drives it with a plain TCP client.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtsp_live::{
    AVFrame, FrameType, H264Source, MediaChannelId, MediaSession, MediaSessionId, RtspError,
    RtspServer, ServerConfig,
};

const TIMEOUT: Duration = Duration::from_secs(2);

struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect_timeout(&addr, TIMEOUT).expect("connect to server");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(TIMEOUT)).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn send(&mut self, request: &str) {
        self.writer.write_all(request.as_bytes()).unwrap();
        self.writer.flush().unwrap();
    }

    fn read_response(&mut self) -> String {
        let mut response = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).expect("response line") == 0 {
                break;
            }
            response.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }

        if let Some(len) = header(&response, "Content-Length").and_then(|v| v.parse::<usize>().ok())
        {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).unwrap();
            response.push_str(&String::from_utf8_lossy(&body));
        }
        response
    }

    fn request(&mut self, request: &str) -> String {
        self.send(request);
        self.read_response()
    }

    /// One `$<channel><len>` framed packet.
    fn read_interleaved(&mut self) -> (u8, Vec<u8>) {
        let mut prefix = [0u8; 4];
        self.reader.read_exact(&mut prefix).expect("interleaved prefix");
        assert_eq!(prefix[0], b'$', "interleaved frame must start with '$'");
        let len = u16::from_be_bytes([prefix[2], prefix[3]]) as usize;
        let mut packet = vec![0u8; len];
        self.reader.read_exact(&mut packet).unwrap();
        (prefix[1], packet)
    }
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn session_header(response: &str) -> u32 {
    let value = header(response, "Session").expect("Session header");
    value.split(';').next().unwrap().parse().expect("numeric session id")
}

fn start_server() -> (RtspServer, MediaSessionId) {
    start_server_with(ServerConfig::default())
}

fn start_server_with(config: ServerConfig) -> (RtspServer, MediaSessionId) {
    let server = RtspServer::start(ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        io_workers: 2,
        ..config
    })
    .expect("server start");

    let session = MediaSession::new("live");
    session.add_source(MediaChannelId::Channel0, Box::new(H264Source::new(25)));
    let id = server.add_session(session).expect("add session");
    (server, id)
}

fn url(server: &RtspServer, path: &str) -> String {
    format!("rtsp://{}/{}", server.local_addr(), path)
}

fn describe(client: &mut Client, server: &RtspServer, cseq: u32) -> String {
    client.request(&format!(
        "DESCRIBE {} RTSP/1.0\r\nCSeq: {cseq}\r\nAccept: application/sdp\r\n\r\n",
        url(server, "live")
    ))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn nal(first: u8, size: usize) -> Vec<u8> {
    let mut nal = vec![first];
    nal.extend((1..size).map(|i| i as u8));
    nal
}

#[test]
fn options_exact_response() {
    let (server, _) = start_server();
    let mut client = Client::connect(server.local_addr());

    let response = client.request(&format!(
        "OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(
        response,
        "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY\r\n\r\n"
    );
}

#[test]
fn describe_unknown_suffix_is_404() {
    let (server, _) = start_server();
    let mut client = Client::connect(server.local_addr());

    let response = client.request(&format!(
        "DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
        url(&server, "nope")
    ));
    assert_eq!(response, "RTSP/1.0 404 Stream Not Found\r\nCSeq: 2\r\n\r\n");
}

#[test]
fn describe_returns_sdp() {
    let (server, id) = start_server();
    let mut client = Client::connect(server.local_addr());

    let response = describe(&mut client, &server, 2);
    assert!(response.starts_with("RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: "));
    assert!(response.contains("Content-Type: application/sdp\r\n\r\nv=0\r\n"));
    assert!(response.contains("m=video 0 RTP/AVP 96\r\n"));
    assert!(response.contains("a=rtpmap:96 H264/90000\r\n"));
    assert!(response.contains("a=control:track0\r\n"));

    let session = server.find_session(id).unwrap();
    assert_eq!(session.client_count(), 1);

    let again = describe(&mut client, &server, 3);
    assert!(again.starts_with("RTSP/1.0 200 OK\r\nCSeq: 3\r\n"));
    assert_eq!(session.client_count(), 1, "a client is never added twice");
}

#[test]
fn interleaved_play_delivers_rtp() {
    let (server, id) = start_server();
    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);

    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
        url(&server, "live/track0")
    ));
    let session_id = session_header(&setup);
    assert_eq!(
        setup,
        format!(
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\nSession: {session_id}\r\n\r\n"
        )
    );

    // Set up but not playing: nothing may be sent.
    assert!(
        server
            .push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal(0x65, 10), FrameType::VideoI))
            .unwrap()
    );

    let play = client.request(&format!(
        "PLAY {} RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(
        play,
        format!("RTSP/1.0 200 OK\r\nCSeq: 4\r\nRange: npt=0.00-\r\nSession: {session_id};timeout=60\r\n\r\n")
    );

    let big = nal(0x65, 3000);
    server
        .push_frame(id, MediaChannelId::Channel0, AVFrame::new(big.clone(), FrameType::VideoI).with_timestamp(9000))
        .unwrap();
    server
        .push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal(0x41, 50), FrameType::VideoP).with_timestamp(12600))
        .unwrap();

    let packets: Vec<(u8, Vec<u8>)> = (0..4).map(|_| client.read_interleaved()).collect();
    assert!(packets.iter().all(|(channel, _)| *channel == 0));

    let seqs: Vec<u16> = packets
        .iter()
        .map(|(_, p)| u16::from_be_bytes([p[2], p[3]]))
        .collect();
    for pair in seqs.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }

    let markers: Vec<bool> = packets.iter().map(|(_, p)| p[1] & 0x80 != 0).collect();
    assert_eq!(markers, vec![false, false, true, true]);
    assert!(packets.iter().all(|(_, p)| p[0] >> 6 == 2 && p[1] & 0x7f == 96));

    let fu: Vec<(u8, u8)> = packets[..3].iter().map(|(_, p)| (p[12], p[13])).collect();
    assert_eq!(fu[0], (0x7c, 0x85), "FU-A indicator and start header");
    assert_eq!(fu[1], (0x7c, 0x05));
    assert_eq!(fu[2], (0x7c, 0x45), "end bit on the last fragment");

    let mut reassembled = vec![0x65];
    for (_, p) in &packets[..3] {
        reassembled.extend_from_slice(&p[14..]);
    }
    assert_eq!(reassembled, big);

    let ts = |p: &[u8]| u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
    assert_eq!(ts(&packets[0].1), 9000);
    assert_eq!(ts(&packets[3].1), 12600);
    assert_eq!(&packets[3].1[12..], nal(0x41, 50).as_slice());
}

#[test]
fn udp_setup_delivers_datagrams() {
    let (server, id) = start_server();
    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(TIMEOUT)).unwrap();
    let port = rtp.local_addr().unwrap().port();

    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
        url(&server, "live/track0"),
        port,
        port + 1
    ));
    assert!(setup.starts_with("RTSP/1.0 200 OK\r\nCSeq: 3\r\n"));
    let transport = header(&setup, "Transport").unwrap();
    let server_ports = transport
        .split(';')
        .find_map(|p| p.strip_prefix("server_port="))
        .expect("server_port");
    let (a, b) = server_ports.split_once('-').unwrap();
    let (a, b): (u16, u16) = (a.parse().unwrap(), b.parse().unwrap());
    assert_eq!(a % 2, 0);
    assert_eq!(b, a + 1);
    assert!(transport.starts_with(&format!("RTP/AVP;unicast;client_port={}-{}", port, port + 1)));

    let session_id = session_header(&setup);
    client.request(&format!(
        "PLAY {} RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n",
        url(&server, "live")
    ));

    let unit = nal(0x65, 100);
    server
        .push_frame(id, MediaChannelId::Channel0, AVFrame::new(unit.clone(), FrameType::VideoI))
        .unwrap();

    let mut buf = [0u8; 2048];
    let (n, from) = rtp.recv_from(&mut buf).expect("RTP datagram");
    assert_eq!(from.port(), a);
    assert_eq!(n, 12 + unit.len());
    assert_eq!(buf[0], 0x80);
    assert_eq!(buf[1], 0x80 | 96);
    assert_eq!(&buf[12..n], unit.as_slice());
}

#[test]
fn media_is_held_until_keyframe() {
    let (server, id) = start_server();
    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);
    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=2-3\r\n\r\n",
        url(&server, "live")
    ));
    let session_id = session_header(&setup);
    client.request(&format!(
        "PLAY {} RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n",
        url(&server, "live")
    ));

    server
        .push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal(0x41, 20), FrameType::VideoP))
        .unwrap();
    server
        .push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal(0x65, 30), FrameType::VideoI))
        .unwrap();

    let (channel, packet) = client.read_interleaved();
    assert_eq!(channel, 2);
    assert_eq!(&packet[12..], nal(0x65, 30).as_slice(), "first packet is the keyframe");
}

#[test]
fn teardown_removes_client() {
    let (server, id) = start_server();
    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let sink = disconnects.clone();
    server
        .find_session(id)
        .unwrap()
        .on_client_disconnect(move |session, ip, port| sink.lock().push((session, ip, port)));

    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);
    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
        url(&server, "live")
    ));
    let session_id = session_header(&setup);

    let teardown = client.request(&format!(
        "TEARDOWN {} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(
        teardown,
        format!("RTSP/1.0 200 OK\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n")
    );

    assert_eq!(server.find_session(id).unwrap().client_count(), 0);
    let local = client.writer.local_addr().unwrap();
    assert_eq!(*disconnects.lock(), vec![(id, local.ip(), local.port())]);
    assert!(
        !server
            .push_frame(id, MediaChannelId::Channel0, AVFrame::new(nal(0x65, 10), FrameType::VideoI))
            .unwrap()
    );

    let keepalive = client.request(&format!(
        "GET_PARAMETER {} RTSP/1.0\r\nCSeq: 6\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(keepalive, "RTSP/1.0 200 OK\r\nCSeq: 6\r\n\r\n");
}

#[test]
fn disconnect_removes_client() {
    let (server, id) = start_server();
    let session = server.find_session(id).unwrap();

    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);
    assert_eq!(session.client_count(), 1);

    drop(client);
    assert!(wait_until(|| session.client_count() == 0));
}

#[test]
fn setup_and_play_before_describe_fail() {
    let (server, _) = start_server();
    let mut client = Client::connect(server.local_addr());

    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(setup, "RTSP/1.0 500 Internal Server Error\r\nCSeq: 3\r\n\r\n");

    let play = client.request(&format!(
        "PLAY {} RTSP/1.0\r\nCSeq: 4\r\n\r\n",
        url(&server, "live")
    ));
    assert_eq!(play, "RTSP/1.0 500 Internal Server Error\r\nCSeq: 4\r\n\r\n");
}

#[test]
fn udp_setup_without_free_ports_fails() {
    // No even port fits in the range, so no RTP/RTCP pair can be bound.
    let (server, _) = start_server_with(ServerConfig {
        udp_port_range: 5001..=5001,
        ..ServerConfig::default()
    });
    let mut client = Client::connect(server.local_addr());
    assert!(describe(&mut client, &server, 2).starts_with("RTSP/1.0 200 OK\r\n"));

    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n",
        url(&server, "live/track0")
    ));
    assert_eq!(setup, "RTSP/1.0 500 Internal Server Error\r\nCSeq: 3\r\n\r\n");
}

#[test]
fn setup_after_session_removed_fails() {
    let (server, id) = start_server();
    let mut client = Client::connect(server.local_addr());
    assert!(describe(&mut client, &server, 2).starts_with("RTSP/1.0 200 OK\r\n"));

    assert!(server.remove_session(id).is_some());
    let setup = client.request(&format!(
        "SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
        url(&server, "live/track0")
    ));
    assert_eq!(setup, "RTSP/1.0 500 Internal Server Error\r\nCSeq: 3\r\n\r\n");
}

#[test]
fn describe_without_sources_fails() {
    let (server, _) = start_server();
    server.add_session(MediaSession::new("empty")).unwrap();
    let mut client = Client::connect(server.local_addr());

    let response = client.request(&format!(
        "DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
        url(&server, "empty")
    ));
    assert_eq!(response, "RTSP/1.0 500 Internal Server Error\r\nCSeq: 2\r\n\r\n");
}

#[test]
fn malformed_request_gets_no_response() {
    let (server, _) = start_server();
    let mut client = Client::connect(server.local_addr());

    client.send("HELLO\r\n\r\n");
    thread::sleep(Duration::from_millis(100));

    // No CSeq and none cached yet: dropped as well.
    client.send(&format!("OPTIONS {} RTSP/1.0\r\n\r\n", url(&server, "live")));
    thread::sleep(Duration::from_millis(100));

    let response = client.request(&format!(
        "OPTIONS {} RTSP/1.0\r\nCSeq: 7\r\n\r\n",
        url(&server, "live")
    ));
    assert!(response.starts_with("RTSP/1.0 200 OK\r\nCSeq: 7\r\n"));

    // Now a CSeq is cached and reused.
    thread::sleep(Duration::from_millis(100));
    let response = client.request(&format!("OPTIONS {} RTSP/1.0\r\n\r\n", url(&server, "live")));
    assert!(response.starts_with("RTSP/1.0 200 OK\r\nCSeq: 7\r\n"));
}

#[test]
fn duplicate_suffix_is_rejected() {
    let (server, id) = start_server();
    let err = server.add_session(MediaSession::new("live")).unwrap_err();
    assert!(matches!(err, RtspError::DuplicateSuffix(ref s) if s == "live"));

    assert!(server.remove_session(id).is_some());
    assert!(server.add_session(MediaSession::new("live")).is_ok());
}

#[test]
fn shutdown_closes_connections() {
    let (server, _) = start_server();
    let mut client = Client::connect(server.local_addr());
    describe(&mut client, &server, 2);

    server.shutdown();
    server.shutdown();

    let mut buf = [0u8; 16];
    let closed = match client.reader.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
    };
    assert!(closed);
}
