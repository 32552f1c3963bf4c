//! Codec traits the relay pipelines are written against.

use bytes::Bytes;

use crate::error::CodecError;

/// Turns one fixed-size PCM frame into a compressed packet.
pub trait StreamEncoder: Send {
    /// Number of interleaved samples `encode` expects per call.
    fn frame_samples(&self) -> usize;

    /// Encode exactly `frame_samples()` samples.
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;
}

/// Turns a compressed packet back into interleaved i16 PCM.
///
/// The returned slice borrows the decoder's scratch buffer and is only
/// valid until the next call.
pub trait StreamDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<&[i16], CodecError>;
}
