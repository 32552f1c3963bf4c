//! voice_relay - full-duplex relay between a local PCM device and a remote
//! packetized Opus voice transport.
//!
//! ```text
//!  mic ──► CapturePort ──► OpusEncoder ──► session.outbound()   (send pipeline)
//!
//!  session.inbound() ──► OpusDecoder ──► FrameReconciler ──► PlaybackPort ──► speaker
//!                                                            (receive pipeline)
//! ```
//!
//! The two pipelines run on separate OS threads and share nothing but the
//! [`relay::RelayControl`] stop token and the borrowed [`relay::RelaySession`].

pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod net_link;
pub mod relay;

pub use error::{Error, Result};
pub use relay::{
    run_relay, Relay, RelayConfig, RelayControl, RelayMode, RelayReport, RelaySession,
};

/// Fixed audio parameters of the relay.
pub mod constants {
    use std::time::Duration;

    /// Sample rate of every port and codec instance.
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Mono.
    pub const CHANNELS: u16 = 1;

    /// Capture cadence.
    pub const FRAME_DURATION_MS: u32 = 20;

    /// Samples in one capture block / one encoded frame (20 ms @ 48 kHz).
    pub const CAPTURE_FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

    /// Default playback block (40 ms).
    pub const DEFAULT_OUTPUT_FRAMES: usize = 1920;

    /// Largest accepted playback block (1 s).
    pub const MAX_OUTPUT_FRAMES: usize = SAMPLE_RATE as usize;

    /// Upper bound for one encoded packet.
    pub const MAX_PACKET_SIZE: usize = 1000;

    /// Largest Opus frame the decoder accepts (120 ms @ 48 kHz).
    pub const MAX_DECODE_SAMPLES: usize = 5760;

    /// How long the receive pipeline waits before re-checking readiness.
    pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Default capacity of the session's packet channels.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
}
