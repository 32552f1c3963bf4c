//! ALSA PCM device ports for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::port::{CapturePort, PlaybackPort};
use crate::error::DeviceError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// One PCM device hint as reported by `snd_device_name_hint`.
#[derive(Debug, Clone)]
pub struct PcmDeviceInfo {
    pub name: String,
    pub description: Option<String>,
    pub is_input: bool,
    pub is_output: bool,
}

/// Open a PCM device for capture with a period of `block_frames`.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    block_frames: usize,
) -> Result<(PCM, AlsaParams), DeviceError> {
    open_pcm(device, Direction::Capture, sample_rate, channels, Some(block_frames), "capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), DeviceError> {
    open_pcm(device, Direction::Playback, sample_rate, channels, period_size, "playback")
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &'static str,
) -> Result<(PCM, AlsaParams), DeviceError> {
    let open_err = |e: alsa::Error| DeviceError::Open {
        device: device.to_string(),
        direction: dir_name,
        reason: e.to_string(),
    };

    let pcm = PCM::new(device, direction, false).map_err(open_err)?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(open_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(open_err)?;
        hwp.set_format(Format::S16LE).map_err(open_err)?;
        hwp.set_channels(channels).map_err(open_err)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest).map_err(open_err)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(open_err)?;
        }
        pcm.hw_params(&hwp).map_err(open_err)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, actual_period) = {
        let hwp = pcm.hw_params_current().map_err(open_err)?;
        let rate = hwp.get_rate().map_err(open_err)?;
        let ch = hwp.get_channels().map_err(open_err)?;
        let ps = hwp.get_period_size().map_err(open_err)? as usize;
        (rate, ch, ps)
    };

    // The codec runs at a fixed rate, there is nothing to resample with.
    if actual_rate != sample_rate || actual_channels != channels {
        return Err(DeviceError::UnsupportedFormat {
            device: device.to_string(),
            reason: format!(
                "requested {}Hz/{}ch, hardware negotiated {}Hz/{}ch",
                sample_rate, channels, actual_rate, actual_channels
            ),
        });
    }

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size: actual_period,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        actual_period,
    );

    Ok((pcm, params))
}

/// List PCM devices known to ALSA.
pub fn list_pcm_devices() -> Result<Vec<PcmDeviceInfo>, DeviceError> {
    let hints = alsa::device_name::HintIter::new_str(None, "pcm").map_err(|e| DeviceError::Open {
        device: "pcm".to_string(),
        direction: "hint",
        reason: e.to_string(),
    })?;

    Ok(hints
        .filter_map(|hint| {
            let name = hint.name?;
            // No direction means the device does both.
            let (is_input, is_output) = match hint.direction {
                Some(Direction::Capture) => (true, false),
                Some(Direction::Playback) => (false, true),
                None => (true, true),
            };
            Some(PcmDeviceInfo {
                name,
                description: hint.desc,
                is_input,
                is_output,
            })
        })
        .collect())
}

// ======================== Capture ========================

/// Blocking ALSA capture port.
pub struct AlsaCapture {
    pcm: PCM,
    params: AlsaParams,
    device: String,
    running: bool,
}

impl AlsaCapture {
    pub fn open(
        device: &str,
        sample_rate: u32,
        channels: u32,
        block_frames: usize,
    ) -> Result<Self, DeviceError> {
        let (pcm, params) = open_capture(device, sample_rate, channels, block_frames)?;
        Ok(Self {
            pcm,
            params,
            device: device.to_string(),
            running: false,
        })
    }
}

impl CapturePort for AlsaCapture {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.running {
            return Ok(());
        }
        self.pcm
            .start()
            .map_err(|e| DeviceError::Start(format!("{}: {}", self.device, e)))?;
        self.running = true;
        Ok(())
    }

    fn read_block(&mut self, block: &mut [i16]) -> Result<(), DeviceError> {
        let channels = self.params.channels as usize;
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Read(e.to_string()))?;

        let total_frames = block.len() / channels;
        let mut frames_read = 0;
        while frames_read < total_frames {
            let offset = frames_read * channels;
            match io.readi(&mut block[offset..]) {
                Ok(n) => frames_read += n,
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    if let Err(e2) = self.pcm.prepare() {
                        log::error!("Failed to recover PCM capture: {}", e2);
                    } else if let Err(e3) = self.pcm.start() {
                        log::debug!("Capture restart after recovery failed: {}", e3);
                    }
                    // The partial block is stale after an overrun.
                    return Err(DeviceError::Read(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Err(e) = self.pcm.drop() {
            log::warn!("Failed to stop capture on {}: {}", self.device, e);
        }
        log::info!("Capture stopped: {}", self.device);
    }
}

// ======================== Playback ========================

/// Blocking ALSA playback port.
pub struct AlsaPlayback {
    pcm: PCM,
    params: AlsaParams,
    device: String,
    running: bool,
}

impl AlsaPlayback {
    pub fn open(
        device: &str,
        sample_rate: u32,
        channels: u32,
        period_size: Option<usize>,
    ) -> Result<Self, DeviceError> {
        let (pcm, params) = open_playback(device, sample_rate, channels, period_size)?;
        Ok(Self {
            pcm,
            params,
            device: device.to_string(),
            running: false,
        })
    }
}

impl PlaybackPort for AlsaPlayback {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.running {
            return Ok(());
        }
        // Playback starts on the first write once the stream is prepared.
        self.pcm
            .prepare()
            .map_err(|e| DeviceError::Start(format!("{}: {}", self.device, e)))?;
        self.running = true;
        Ok(())
    }

    fn write_block(&mut self, block: &[i16]) -> Result<(), DeviceError> {
        let channels = self.params.channels as usize;
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Write(e.to_string()))?;

        // Retry short writes and XRUNs without losing frames.
        let total_frames = block.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&block[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    if let Err(e2) = self.pcm.prepare() {
                        return Err(DeviceError::Write(format!(
                            "{} (recovery failed: {})",
                            e, e2
                        )));
                    }

                    // Hardware can't keep up; give this block up instead of spinning.
                    if retry_count >= 3 {
                        return Err(DeviceError::Write(format!(
                            "{} after {} recoveries, dropped {} frames",
                            e,
                            retry_count,
                            total_frames - frames_written
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn drain(&mut self) {
        if !self.running {
            return;
        }
        if let Err(e) = self.pcm.drain() {
            log::debug!("Playback drain on {} failed: {}", self.device, e);
        }
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Err(e) = self.pcm.drop() {
            log::warn!("Failed to stop playback on {}: {}", self.device, e);
        }
        log::info!("Playback stopped: {}", self.device);
    }
}
