//! Fake ports, codecs and backend shared by the relay tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::config::RelayConfig;
use super::supervisor::AudioBackend;
use crate::audio::{CapturePort, PlaybackPort, StreamDecoder, StreamEncoder};
use crate::error::{CodecError, DeviceError, Result};

/// Lifecycle counters of one fake port.
#[derive(Default)]
pub struct PortLog {
    pub opened: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub io_calls: AtomicUsize,
}

impl PortLog {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }
}

type ReadHook = Box<dyn FnMut(usize) -> bool + Send>;

/// Capture port producing block `n` filled with the value `n`.
pub struct FakeCapture {
    pub log: Arc<PortLog>,
    pub pace: Duration,
    pub fail_start: bool,
    /// Called with the read index before the block is produced; returning
    /// `false` turns the read into an error.
    pub on_read: Option<ReadHook>,
    reads: usize,
}

impl FakeCapture {
    pub fn new(log: Arc<PortLog>) -> Self {
        Self {
            log,
            pace: Duration::from_millis(1),
            fail_start: false,
            on_read: None,
            reads: 0,
        }
    }

    pub fn with_hook(mut self, hook: impl FnMut(usize) -> bool + Send + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }
}

impl CapturePort for FakeCapture {
    fn start(&mut self) -> std::result::Result<(), DeviceError> {
        if self.fail_start {
            return Err(DeviceError::Start("fake capture refused".into()));
        }
        self.log.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_block(&mut self, block: &mut [i16]) -> std::result::Result<(), DeviceError> {
        let n = self.reads;
        self.reads += 1;
        self.log.io_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.pace);

        if let Some(hook) = self.on_read.as_mut() {
            if !hook(n) {
                return Err(DeviceError::Read(format!("fake read {} failed", n)));
            }
        }
        block.fill(n as i16);
        Ok(())
    }

    fn stop(&mut self) {
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Playback port recording every block written.
pub struct FakePlayback {
    pub log: Arc<PortLog>,
    pub played: Arc<Mutex<Vec<Vec<i16>>>>,
    pub fail_start: bool,
    /// Zero-based write indices that fail
    pub fail_writes: HashSet<usize>,
}

impl FakePlayback {
    pub fn new(log: Arc<PortLog>, played: Arc<Mutex<Vec<Vec<i16>>>>) -> Self {
        Self {
            log,
            played,
            fail_start: false,
            fail_writes: HashSet::new(),
        }
    }
}

impl PlaybackPort for FakePlayback {
    fn start(&mut self) -> std::result::Result<(), DeviceError> {
        if self.fail_start {
            return Err(DeviceError::Start("fake playback refused".into()));
        }
        self.log.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_block(&mut self, block: &[i16]) -> std::result::Result<(), DeviceError> {
        let n = self.log.io_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.contains(&n) {
            return Err(DeviceError::Write(format!("fake write {} failed", n)));
        }
        self.played.lock().unwrap().push(block.to_vec());
        Ok(())
    }

    fn stop(&mut self) {
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Encodes a frame as its first sample (LE) followed by the frame length.
pub struct FakeEncoder {
    pub frame_samples: usize,
    /// Frames whose first sample is in here fail to encode
    pub fail_on: HashSet<i16>,
}

impl FakeEncoder {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            fail_on: HashSet::new(),
        }
    }
}

impl StreamEncoder for FakeEncoder {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn encode(&mut self, pcm: &[i16]) -> std::result::Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }
        if self.fail_on.contains(&pcm[0]) {
            return Err(CodecError::EncodingFailed(format!("fake failure on {}", pcm[0])));
        }
        let mut out = Vec::with_capacity(4);
        out.extend_from_slice(&pcm[0].to_le_bytes());
        out.extend_from_slice(&(pcm.len() as u16).to_le_bytes());
        Ok(Bytes::from(out))
    }
}

/// Inverse of [`FakeEncoder`]; payloads of any other length fail.
#[derive(Default)]
pub struct FakeDecoder {
    buf: Vec<i16>,
}

impl StreamDecoder for FakeDecoder {
    fn decode(&mut self, data: &[u8]) -> std::result::Result<&[i16], CodecError> {
        if data.len() != 4 {
            return Err(CodecError::DecodingFailed(format!(
                "bad fake packet of {} bytes",
                data.len()
            )));
        }
        let value = i16::from_le_bytes([data[0], data[1]]);
        let len = u16::from_le_bytes([data[2], data[3]]) as usize;
        self.buf.clear();
        self.buf.resize(len, value);
        Ok(&self.buf)
    }
}

/// Fake packet carrying `len` samples of `value`.
pub fn fake_packet(value: i16, len: usize) -> Bytes {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    Bytes::from(out)
}

/// Backend handing out fresh fakes that report into shared logs.
pub struct FakeBackend {
    pub capture_log: Arc<PortLog>,
    pub playback_log: Arc<PortLog>,
    pub played: Arc<Mutex<Vec<Vec<i16>>>>,
    pub fail_open_capture: bool,
    pub fail_open_playback: bool,
    pub fail_start_capture: bool,
    pub fail_start_playback: bool,
    pub fail_decoder: bool,
    pub capture_hook: Mutex<Option<ReadHook>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            capture_log: Arc::new(PortLog::default()),
            playback_log: Arc::new(PortLog::default()),
            played: Arc::new(Mutex::new(Vec::new())),
            fail_open_capture: false,
            fail_open_playback: false,
            fail_start_capture: false,
            fail_start_playback: false,
            fail_decoder: false,
            capture_hook: Mutex::new(None),
        }
    }

    pub fn with_capture_hook(self, hook: impl FnMut(usize) -> bool + Send + 'static) -> Self {
        *self.capture_hook.lock().unwrap() = Some(Box::new(hook));
        self
    }
}

impl AudioBackend for FakeBackend {
    fn open_capture(&self, _config: &RelayConfig) -> Result<Box<dyn CapturePort>> {
        if self.fail_open_capture {
            return Err(DeviceError::Open {
                device: "fake".into(),
                direction: "capture",
                reason: "busy".into(),
            }
            .into());
        }
        self.capture_log.opened.fetch_add(1, Ordering::SeqCst);
        let mut capture = FakeCapture::new(self.capture_log.clone());
        capture.fail_start = self.fail_start_capture;
        capture.on_read = self.capture_hook.lock().unwrap().take();
        Ok(Box::new(capture))
    }

    fn open_playback(&self, _config: &RelayConfig) -> Result<Box<dyn PlaybackPort>> {
        if self.fail_open_playback {
            return Err(DeviceError::Open {
                device: "fake".into(),
                direction: "playback",
                reason: "busy".into(),
            }
            .into());
        }
        self.playback_log.opened.fetch_add(1, Ordering::SeqCst);
        let mut playback = FakePlayback::new(self.playback_log.clone(), self.played.clone());
        playback.fail_start = self.fail_start_playback;
        Ok(Box::new(playback))
    }

    fn create_encoder(&self, _config: &RelayConfig) -> Result<Box<dyn StreamEncoder>> {
        Ok(Box::new(FakeEncoder::new(crate::constants::CAPTURE_FRAME_SAMPLES)))
    }

    fn create_decoder(&self, _config: &RelayConfig) -> Result<Box<dyn StreamDecoder>> {
        if self.fail_decoder {
            return Err(CodecError::DecoderInit("fake decoder refused".into()).into());
        }
        Ok(Box::new(FakeDecoder::default()))
    }
}
