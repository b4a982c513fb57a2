use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use roomcall_lib::config::{ClientConfig, DEFAULT_PAGE_URL};
use roomcall_lib::models::{FrameSize, RoomId};
use roomcall_lib::HeadlessOptions;

#[derive(Parser)]
#[command(name = "roomcall", about = "SFU group video-call room client")]
struct Cli {
    /// Page URL the room is opened from; its roomId query selects the room
    #[arg(long, default_value = DEFAULT_PAGE_URL)]
    url: String,

    /// Room to join, overriding the page URL
    #[arg(long)]
    room_id: Option<String>,

    /// Delay before reconnecting after the connection drops
    #[arg(long, default_value = "1000")]
    reconnect_delay_ms: u64,

    #[arg(long, default_value = "30")]
    frame_rate: u32,

    #[arg(long, default_value = "1920")]
    width: u32,

    #[arg(long, default_value = "1080")]
    height: u32,

    /// Number of synthetic microphones
    #[arg(long, default_value = "1")]
    audio_devices: usize,

    /// Number of synthetic cameras
    #[arg(long, default_value = "1")]
    video_devices: usize,

    /// Join without a microphone
    #[arg(long)]
    no_audio: bool,

    /// Join without a camera
    #[arg(long)]
    no_video: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ClientConfig::new(&cli.url) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid --url: {e}");
            std::process::exit(2);
        }
    };
    let config = ClientConfig {
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
        frame_rate: cli.frame_rate,
        frame_size: FrameSize::new(cli.width, cli.height),
        ..config.with_room_id(cli.room_id.map(RoomId::new))
    };
    let options = HeadlessOptions {
        config,
        audio_devices: if cli.no_audio { 0 } else { cli.audio_devices },
        video_devices: if cli.no_video { 0 } else { cli.video_devices },
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");
    if let Err(e) = rt.block_on(roomcall_lib::run_headless(options)) {
        tracing::error!("Room client failed: {}", e);
        std::process::exit(1);
    }
}
