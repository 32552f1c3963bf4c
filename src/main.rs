use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;

use voice_relay::audio::alsa_device::list_pcm_devices;
use voice_relay::audio::tone::{speaker_test, SineWave};
use voice_relay::audio::AlsaPlayback;
use voice_relay::config::AppConfig;
use voice_relay::constants::{CAPTURE_FRAME_SAMPLES, CHANNELS, SAMPLE_RATE};
use voice_relay::logging;
use voice_relay::net_link::NetLink;
use voice_relay::relay::ChannelSession;
use voice_relay::{run_relay, RelayConfig, RelayControl, RelayReport, RelaySession};

#[derive(Parser)]
#[command(name = "voice_relay")]
#[command(about = "Relay a local microphone and speaker to a remote Opus voice session")]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the session server and relay until Ctrl+C
    Run,
    /// Play the microphone back through the speaker via the codec
    Loopback,
    /// Play a sine tone on the playback device
    SpeakerTest {
        #[arg(long)]
        frequency: Option<f64>,
        #[arg(long)]
        seconds: Option<f64>,
        #[arg(long)]
        device: Option<String>,
    },
    /// List ALSA PCM devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 先读配置文件，日志初始化后再应用环境变量覆盖，保证告警能输出
    let mut config = AppConfig::load_file(cli.config.as_deref())?;
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| config.log.level.clone());
    logging::init(&level, config.log.file.as_deref()).context("failed to initialize logging")?;
    config.prepare()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            config.resolve_client_id();
            run_session(config).await
        }
        Commands::Loopback => run_loopback(config).await,
        Commands::SpeakerTest {
            frequency,
            seconds,
            device,
        } => {
            let frequency = frequency.unwrap_or(config.audio.tone_frequency);
            let seconds = seconds.unwrap_or(config.audio.tone_seconds);
            let device = device.unwrap_or(config.relay.playback_device);
            let amplitude = config.audio.tone_amplitude;
            tokio::task::spawn_blocking(move || {
                play_tone(&device, frequency, seconds, amplitude)
            })
            .await?
        }
        Commands::Devices => show_devices(),
    }
}

async fn run_session(config: AppConfig) -> anyhow::Result<()> {
    let (link, session) = NetLink::new(config.session.clone()).context("failed to start net link")?;
    let session = Arc::new(session);
    let link_task = tokio::spawn(link.run());

    let control = RelayControl::new();
    shutdown_on_ctrl_c(control.clone());

    let result = relay_until_done(session.clone(), control, config.relay).await;

    session.disconnect();
    if let Err(e) = link_task.await {
        log::error!("Net link task failed: {}", e);
    }
    log::info!("Dropped {} inbound packets while the relay lagged", session.inbound_dropped());
    result.map(|report| log_report(&report))
}

async fn run_loopback(config: AppConfig) -> anyhow::Result<()> {
    let session = Arc::new(ChannelSession::loopback(config.session.outbound_capacity));
    let control = RelayControl::new();
    shutdown_on_ctrl_c(control.clone());

    log::info!("Loopback running, speak into the microphone. Ctrl+C to stop.");
    let report = relay_until_done(session, control, config.relay).await?;
    log_report(&report);
    Ok(())
}

async fn relay_until_done<S>(
    session: Arc<S>,
    control: RelayControl,
    config: RelayConfig,
) -> anyhow::Result<RelayReport>
where
    S: RelaySession + 'static,
{
    let report = tokio::task::spawn_blocking(move || run_relay(session.as_ref(), &control, &config))
        .await
        .context("relay thread panicked")?
        .context("relay failed")?;
    Ok(report)
}

fn shutdown_on_ctrl_c(control: RelayControl) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received Ctrl+C, shutting down...");
                control.shutdown();
            }
            Err(e) => log::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

fn log_report(report: &RelayReport) {
    log::info!("Relay finished: {:?}", report.exit);
    log::info!(
        "  send: captured={} sent={} dropped_not_ready={} dropped_closed={} capture_errors={} encode_errors={}",
        report.send.captured,
        report.send.sent,
        report.send.dropped_not_ready,
        report.send.dropped_closed,
        report.send.capture_errors,
        report.send.encode_errors
    );
    log::info!(
        "  receive: received={} decoded_samples={} decode_errors={} blocks_played={} write_errors={}",
        report.receive.received,
        report.receive.decoded_samples,
        report.receive.decode_errors,
        report.receive.blocks_played,
        report.receive.write_errors
    );
}

fn play_tone(device: &str, frequency: f64, seconds: f64, amplitude: f64) -> anyhow::Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        anyhow::bail!("tone duration must be positive, got {}", seconds);
    }
    let mut playback = AlsaPlayback::open(device, SAMPLE_RATE, u32::from(CHANNELS), None)?;
    let mut tone = SineWave::new(frequency, SAMPLE_RATE, amplitude);
    let written = speaker_test(
        &mut playback,
        &mut tone,
        CAPTURE_FRAME_SAMPLES,
        Duration::from_secs_f64(seconds),
    )?;
    log::info!("Speaker test done, {} samples written to {}", written, device);
    Ok(())
}

fn show_devices() -> anyhow::Result<()> {
    let devices = list_pcm_devices()?;
    if devices.is_empty() {
        println!("No PCM devices found");
    }
    for device in devices {
        let dirs = match (device.is_input, device.is_output) {
            (true, true) => "capture/playback",
            (true, false) => "capture",
            _ => "playback",
        };
        println!("{} ({})", device.name, dirs);
        if let Some(desc) = device.description {
            for line in desc.lines() {
                println!("    {}", line);
            }
        }
    }
    Ok(())
}
