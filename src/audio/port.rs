//! Blocking PCM endpoints used by the relay pipelines.

use crate::error::DeviceError;

/// A capture endpoint delivering fixed-size blocks of interleaved i16 PCM.
///
/// `read_block` blocks until the hardware has produced a full block, which
/// is what paces the send pipeline.
pub trait CapturePort: Send {
    /// Start the underlying stream. Called once before the first read.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Fill `block` completely with captured samples.
    fn read_block(&mut self, block: &mut [i16]) -> Result<(), DeviceError>;

    /// Stop the stream. Must be safe to call more than once.
    fn stop(&mut self);
}

/// A playback endpoint accepting blocks of interleaved i16 PCM.
pub trait PlaybackPort: Send {
    /// Start the underlying stream. Called once before the first write.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Write the whole block, blocking until the hardware accepted it.
    fn write_block(&mut self, block: &[i16]) -> Result<(), DeviceError>;

    /// Block until everything written so far has been played.
    ///
    /// `stop` discards queued audio, so call this first when the tail
    /// matters.
    fn drain(&mut self) {}

    /// Stop the stream. Must be safe to call more than once.
    fn stop(&mut self);
}
