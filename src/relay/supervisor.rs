//! Relay lifecycle: open and start the ports, run both pipelines, tear down.

use std::thread;

use super::config::{RelayConfig, RelayMode};
use super::control::RelayControl;
use super::receive::{run_receive_pipeline, ReceiveExit, ReceiveStats};
use super::send::{run_send_pipeline, SendStats};
use super::session::RelaySession;
use crate::audio::{
    AlsaCapture, AlsaPlayback, CapturePort, FrameReconciler, OpusDecoder, OpusEncoder,
    PlaybackPort, StreamDecoder, StreamEncoder,
};
use crate::constants::CAPTURE_FRAME_SAMPLES;
use crate::error::{Error, Result};

/// Where a relay is in its life.
///
/// `Idle → Starting → Running → Stopping → Terminated`, or
/// `Starting → Failed` when setup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The caller's control was asserted
    Shutdown,
    /// The session's inbound channel disconnected
    InboundClosed,
    /// The receive thread panicked
    ReceiverFailed,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub exit: RelayExit,
    /// Zero in receive-only mode
    pub send: SendStats,
    pub receive: ReceiveStats,
}

/// Source of ports and codecs for a relay.
pub trait AudioBackend {
    fn open_capture(&self, config: &RelayConfig) -> Result<Box<dyn CapturePort>>;

    fn open_playback(&self, config: &RelayConfig) -> Result<Box<dyn PlaybackPort>>;

    fn create_encoder(&self, config: &RelayConfig) -> Result<Box<dyn StreamEncoder>> {
        Ok(Box::new(OpusEncoder::new(config.bitrate)?))
    }

    fn create_decoder(&self, _config: &RelayConfig) -> Result<Box<dyn StreamDecoder>> {
        Ok(Box::new(OpusDecoder::new()?))
    }
}

/// ALSA devices named in the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlsaBackend;

impl AudioBackend for AlsaBackend {
    fn open_capture(&self, config: &RelayConfig) -> Result<Box<dyn CapturePort>> {
        let channels = usize::from(config.channels);
        let capture = AlsaCapture::open(
            &config.capture_device,
            config.sample_rate,
            u32::from(config.channels),
            CAPTURE_FRAME_SAMPLES / channels,
        )?;
        Ok(Box::new(capture))
    }

    fn open_playback(&self, config: &RelayConfig) -> Result<Box<dyn PlaybackPort>> {
        let channels = usize::from(config.channels);
        let playback = AlsaPlayback::open(
            &config.playback_device,
            config.sample_rate,
            u32::from(config.channels),
            Some(config.output_frames / channels),
        )?;
        Ok(Box::new(playback))
    }
}

/// Everything a running relay owns.
struct Ports {
    capture: Option<Box<dyn CapturePort>>,
    encoder: Option<Box<dyn StreamEncoder>>,
    playback: Box<dyn PlaybackPort>,
    decoder: Box<dyn StreamDecoder>,
}

impl Ports {
    fn stop(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        self.playback.stop();
    }
}

/// One relay between a pair of PCM ports and a session.
pub struct Relay<B: AudioBackend> {
    config: RelayConfig,
    backend: B,
    state: RelayState,
}

impl<B: AudioBackend> Relay<B> {
    pub fn new(config: RelayConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            state: RelayState::Idle,
        })
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    fn transition(&mut self, next: RelayState) {
        log::debug!("Relay {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until `control` is asserted or the session's inbound channel
    /// closes.
    ///
    /// Setup failures are returned before any pipeline starts, with every
    /// port that was already started stopped again. Once running, the call
    /// only returns after both pipelines have exited and both ports have
    /// been stopped exactly once. Asserting `control` again afterwards is
    /// harmless.
    pub fn run(
        &mut self,
        session: &dyn RelaySession,
        control: &RelayControl,
    ) -> Result<RelayReport> {
        self.transition(RelayState::Starting);
        let mut reconciler = FrameReconciler::new(self.config.output_frames);

        let mut ports = match self.setup() {
            Ok(ports) => ports,
            Err(e) => {
                log::error!("Relay setup failed: {}", e);
                self.transition(RelayState::Failed);
                return Err(e);
            }
        };

        let duplex = self.config.mode == RelayMode::Duplex;
        // Inbound closure ends this relay without touching the caller's control.
        let stop = control.child_token();

        self.transition(RelayState::Running);
        log::info!(
            "Relay running ({:?}, capture={}, playback={}, output_frames={})",
            self.config.mode,
            self.config.capture_device,
            self.config.playback_device,
            self.config.output_frames
        );
        if duplex {
            session.set_speaking(true);
        }

        let Ports {
            capture,
            encoder,
            playback,
            decoder,
        } = &mut ports;

        let result = thread::scope(|s| {
            let receiver = thread::Builder::new()
                .name("relay-receive".into())
                .spawn_scoped(s, || {
                    run_receive_pipeline(
                        playback.as_mut(),
                        decoder.as_mut(),
                        &mut reconciler,
                        session,
                        &stop,
                    )
                })
                .map_err(Error::Spawn)?;

            let send = match (capture.as_mut(), encoder.as_mut()) {
                (Some(capture), Some(encoder)) => {
                    run_send_pipeline(capture.as_mut(), encoder.as_mut(), session, &stop)
                }
                _ => {
                    stop.wait();
                    SendStats::default()
                }
            };

            stop.shutdown();
            let receive = receiver.join();
            Ok::<_, Error>((send, receive))
        });

        self.transition(RelayState::Stopping);
        ports.stop();
        if duplex {
            session.set_speaking(false);
        }

        let (send, receive) = match result {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("Relay failed: {}", e);
                self.transition(RelayState::Failed);
                return Err(e);
            }
        };

        let (exit, receive) = match receive {
            Ok(outcome) => {
                let inbound_closed = outcome.exit == ReceiveExit::InboundClosed;
                let exit = if inbound_closed && !control.is_shutdown() {
                    RelayExit::InboundClosed
                } else {
                    RelayExit::Shutdown
                };
                (exit, outcome.stats)
            }
            Err(_) => {
                log::error!("Receive pipeline panicked");
                (RelayExit::ReceiverFailed, ReceiveStats::default())
            }
        };

        self.transition(RelayState::Terminated);
        let report = RelayReport { exit, send, receive };
        log::info!("Relay terminated: {:?}", report);
        Ok(report)
    }

    /// Open every port and codec, then start the ports.
    fn setup(&self) -> Result<Ports> {
        let duplex = self.config.mode == RelayMode::Duplex;

        let mut capture = if duplex {
            Some(self.backend.open_capture(&self.config)?)
        } else {
            None
        };
        let mut playback = self.backend.open_playback(&self.config)?;
        let encoder = if duplex {
            Some(self.backend.create_encoder(&self.config)?)
        } else {
            None
        };
        let decoder = self.backend.create_decoder(&self.config)?;

        if let Some(capture) = capture.as_mut() {
            capture.start()?;
        }
        if let Err(e) = playback.start() {
            if let Some(capture) = capture.as_mut() {
                capture.stop();
            }
            return Err(e.into());
        }

        Ok(Ports {
            capture,
            encoder,
            playback,
            decoder,
        })
    }
}

/// Run one relay on the ALSA devices named in `config`.
///
/// Blocks the calling thread; see [`Relay::run`].
pub fn run_relay(
    session: &dyn RelaySession,
    control: &RelayControl,
    config: &RelayConfig,
) -> Result<RelayReport> {
    Relay::new(config.clone(), AlsaBackend)?.run(session, control)
}
