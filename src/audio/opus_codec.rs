//! Opus encoder/decoder bound to the relay's fixed 48 kHz mono format.
//!
//! - Encoder: one 20 ms frame (960 samples) → one Opus packet of at most
//!   `MAX_PACKET_SIZE` bytes
//! - Decoder: one Opus packet → up to 120 ms of PCM

use bytes::Bytes;

use super::stream_codec::{StreamDecoder, StreamEncoder};
use crate::constants::{
    CAPTURE_FRAME_SAMPLES, CHANNELS, MAX_DECODE_SAMPLES, MAX_PACKET_SIZE, SAMPLE_RATE,
};
use crate::error::CodecError;

fn opus_channels(channels: u16) -> Result<opus::Channels, String> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        other => Err(format!("Unsupported channel count: {}", other)),
    }
}

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: opus::Encoder,
    frame_samples: usize,
    /// Encoding buffer, reused between frames
    packet_buf: Vec<u8>,
}

impl OpusEncoder {
    /// Create an encoder for 960-sample mono frames at 48 kHz.
    ///
    /// * `bitrate` - bits/s, `None` keeps the libopus default
    pub fn new(bitrate: Option<i32>) -> Result<Self, CodecError> {
        Self::with_format(SAMPLE_RATE, CHANNELS, CAPTURE_FRAME_SAMPLES, bitrate)
    }

    fn with_format(
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
        bitrate: Option<i32>,
    ) -> Result<Self, CodecError> {
        let channels = opus_channels(channels).map_err(CodecError::EncoderInit)?;

        let mut encoder = opus::Encoder::new(sample_rate, channels, opus::Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;
        if let Some(bits) = bitrate {
            encoder
                .set_bitrate(opus::Bitrate::Bits(bits))
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        }

        Ok(Self {
            encoder,
            frame_samples,
            packet_buf: vec![0u8; MAX_PACKET_SIZE],
        })
    }
}

impl StreamEncoder for OpusEncoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        // libopus refuses to write past the buffer, which caps the packet size.
        let size = self
            .encoder
            .encode(pcm, &mut self.packet_buf)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.packet_buf[..size]))
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
    channels: usize,
    /// Decoding buffer sized for the longest Opus frame
    pcm_buf: Vec<i16>,
}

impl OpusDecoder {
    /// Create a 48 kHz mono decoder.
    pub fn new() -> Result<Self, CodecError> {
        let channels = opus_channels(CHANNELS).map_err(CodecError::DecoderInit)?;
        let decoder = opus::Decoder::new(SAMPLE_RATE, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            channels: CHANNELS as usize,
            pcm_buf: vec![0i16; MAX_DECODE_SAMPLES * CHANNELS as usize],
        })
    }
}

impl StreamDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<&[i16], CodecError> {
        // libopus treats an empty packet as a lost one and conceals it.
        if data.is_empty() {
            return Err(CodecError::DecodingFailed("empty packet".to_string()));
        }

        let samples_per_ch = self
            .decoder
            .decode(data, &mut self.pcm_buf, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        Ok(&self.pcm_buf[..samples_per_ch * self.channels])
    }
}
