use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rtsp_live::media::h264::{frame_type_of, split_annexb};
use rtsp_live::{
    AVFrame, H264Source, MediaChannelId, MediaSession, MediaSessionId, RtspServer, ServerConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-live-server",
    about = "Live RTSP server looping an H.264 Annex B file"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = rtsp_live::config::DEFAULT_BIND_ADDR)]
    bind: String,

    /// Stream name, served at rtsp://<host>:<port>/<suffix>
    #[arg(long, short, default_value = "live")]
    suffix: String,

    /// Raw H.264 Annex B file to loop
    #[arg(long, short)]
    file: PathBuf,

    /// Frames per second
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// I/O worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// SDP session name; also advertises the stream as a broadcast
    #[arg(long, default_value = "")]
    session_name: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(&args.file)?;
    let nals: Vec<Vec<u8>> = split_annexb(&data).into_iter().map(<[u8]>::to_vec).collect();
    if nals.is_empty() {
        return Err(format!("no NAL units found in {}", args.file.display()).into());
    }
    let fps = args.fps.max(1);

    let mut source = H264Source::new(fps);
    let sps = nals.iter().find(|nal| nal.first().map(|b| b & 0x1f) == Some(7));
    let pps = nals.iter().find(|nal| nal.first().map(|b| b & 0x1f) == Some(8));
    if let (Some(sps), Some(pps)) = (sps, pps) {
        source = source.with_parameter_sets(sps.clone(), pps.clone());
    }
    let pacing = (source.frame_interval(), source.frame_ticks());

    let mut config = ServerConfig {
        bind_addr: args.bind.clone(),
        sdp_session_name: args.session_name.clone(),
        ..ServerConfig::default()
    };
    if let Some(workers) = args.workers {
        config.io_workers = workers;
    }

    let server = Arc::new(RtspServer::start(config)?);

    let session = MediaSession::new(&args.suffix);
    session.add_source(MediaChannelId::Channel0, Box::new(source));
    session.on_client_connect(|id, ip, port| {
        tracing::info!(session = %id, client = %format!("{ip}:{port}"), "viewer connected");
    });
    session.on_client_disconnect(|id, ip, port| {
        tracing::info!(session = %id, client = %format!("{ip}:{port}"), "viewer disconnected");
    });
    let id = server.add_session(session)?;

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let server = server.clone();
        let running = running.clone();
        thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || produce(&server, id, &nals, pacing, &running))?
    };

    tracing::info!(
        url = %format!("rtsp://{}/{}", server.local_addr(), args.suffix),
        file = %args.file.display(),
        fps,
        "streaming; press Enter to stop"
    );
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    running.store(false, Ordering::SeqCst);
    if producer.join().is_err() {
        tracing::error!("producer thread panicked");
    }
    server.shutdown();
    Ok(())
}

/// Loop the file's NAL units, one frame interval per VCL NAL.
/// Parameter sets and SEI share the timestamp of the slice that follows.
fn produce(
    server: &RtspServer,
    id: MediaSessionId,
    nals: &[Vec<u8>],
    (interval, ticks): (Duration, u32),
    running: &AtomicBool,
) {
    let mut timestamp = H264Source::timestamp_now().max(1);
    let mut next_frame = Instant::now();

    while running.load(Ordering::SeqCst) {
        for nal in nals {
            if !running.load(Ordering::SeqCst) {
                return;
            }

            let frame = AVFrame::new(nal.clone(), frame_type_of(nal)).with_timestamp(timestamp);
            if let Err(e) = server.push_frame(id, MediaChannelId::Channel0, frame) {
                tracing::warn!(error = %e, "frame not delivered");
            }

            let is_vcl = matches!(nal.first().map(|b| b & 0x1f), Some(1..=5));
            if is_vcl {
                timestamp = timestamp.wrapping_add(ticks).max(1);
                next_frame += interval;
                let now = Instant::now();
                if next_frame > now {
                    thread::sleep(next_frame - now);
                } else {
                    next_frame = now;
                }
            }
        }
    }
}
