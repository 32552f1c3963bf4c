//! audio - PCM device ports, Opus codec adapter and playback framing
//!
//! Uses ALSA for blocking audio I/O and Opus for encoding/decoding. All
//! ports and codecs run at a fixed 48 kHz mono; there is no resampling.

pub mod alsa_device;
pub mod opus_codec;
pub mod port;
pub mod reconcile;
pub mod stream_codec;
pub mod tone;

pub use alsa_device::{AlsaCapture, AlsaPlayback};
pub use opus_codec::{OpusDecoder, OpusEncoder};
pub use port::{CapturePort, PlaybackPort};
pub use reconcile::FrameReconciler;
pub use stream_codec::{StreamDecoder, StreamEncoder};
