//! Test tone generator and speaker check.

use std::f64::consts::PI;
use std::time::Duration;

use super::port::PlaybackPort;
use crate::error::DeviceError;

/// Endless mono sine wave as i16 samples.
#[derive(Debug, Clone)]
pub struct SineWave {
    frequency: f64,
    sample_rate: u32,
    amplitude: f64,
    position: u64,
}

impl SineWave {
    /// `amplitude` is a fraction of full scale, clamped to 0.0..=1.0.
    pub fn new(frequency: f64, sample_rate: u32, amplitude: f64) -> Self {
        Self {
            frequency,
            sample_rate,
            amplitude: amplitude.clamp(0.0, 1.0),
            position: 0,
        }
    }

    /// Overwrite `block` with the next samples of the wave.
    pub fn fill(&mut self, block: &mut [i16]) {
        for sample in block.iter_mut() {
            *sample = self.next_sample();
        }
    }

    fn next_sample(&mut self) -> i16 {
        let t = self.position as f64 / self.sample_rate as f64;
        self.position += 1;
        let v = (2.0 * PI * self.frequency * t).sin() * self.amplitude;
        (v * i16::MAX as f64) as i16
    }
}

/// Play a tone on `playback` for `duration`, one block at a time.
///
/// Returns the number of samples written.
pub fn speaker_test(
    playback: &mut dyn PlaybackPort,
    tone: &mut SineWave,
    block_samples: usize,
    duration: Duration,
) -> Result<usize, DeviceError> {
    let total = (duration.as_secs_f64() * tone.sample_rate as f64) as usize;

    playback.start()?;
    log::info!(
        "Playing a {} Hz tone for {:.1} seconds",
        tone.frequency,
        duration.as_secs_f64()
    );

    let result = play_samples(playback, tone, block_samples, total);
    if result.is_ok() {
        playback.drain();
    }
    playback.stop();
    result
}

fn play_samples(
    playback: &mut dyn PlaybackPort,
    tone: &mut SineWave,
    block_samples: usize,
    total: usize,
) -> Result<usize, DeviceError> {
    let mut block = vec![0i16; block_samples];
    let mut written = 0;
    while written < total {
        tone.fill(&mut block);
        playback.write_block(&block)?;
        written += block.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingPlayback {
        blocks: Vec<Vec<i16>>,
        events: Vec<&'static str>,
        fail_after: Option<usize>,
    }

    impl PlaybackPort for CollectingPlayback {
        fn start(&mut self) -> Result<(), DeviceError> {
            self.events.push("start");
            Ok(())
        }

        fn write_block(&mut self, block: &[i16]) -> Result<(), DeviceError> {
            if self.fail_after == Some(self.blocks.len()) {
                return Err(DeviceError::Write("unplugged".to_string()));
            }
            self.blocks.push(block.to_vec());
            Ok(())
        }

        fn drain(&mut self) {
            self.events.push("drain");
        }

        fn stop(&mut self) {
            self.events.push("stop");
        }
    }

    #[test]
    fn test_wave_shape() {
        let mut tone = SineWave::new(12_000.0, 48_000, 1.0);
        let mut block = [0i16; 8];
        tone.fill(&mut block);

        // Quarter period is 1 sample at fs/4.
        assert_eq!(block[0], 0);
        assert!(block[1] > 32_000);
        assert!(block[3] < -32_000);
    }

    #[test]
    fn test_amplitude_is_clamped() {
        let mut tone = SineWave::new(440.0, 48_000, 3.0);
        let mut block = vec![0i16; 4800];
        tone.fill(&mut block);
        assert!(block.iter().all(|s| *s > i16::MIN));
    }

    #[test]
    fn test_speaker_test_writes_duration() {
        let mut playback = CollectingPlayback::default();
        let mut tone = SineWave::new(440.0, 48_000, 0.5);

        let written =
            speaker_test(&mut playback, &mut tone, 960, Duration::from_millis(100)).unwrap();

        assert_eq!(written, 4800);
        assert_eq!(playback.blocks.len(), 5);
        // The tail is played out before the stream is dropped.
        assert_eq!(playback.events, ["start", "drain", "stop"]);
    }

    #[test]
    fn test_speaker_test_write_error_skips_drain() {
        let mut playback = CollectingPlayback {
            fail_after: Some(2),
            ..Default::default()
        };
        let mut tone = SineWave::new(440.0, 48_000, 0.5);

        let result = speaker_test(&mut playback, &mut tone, 960, Duration::from_millis(100));

        assert!(matches!(result, Err(DeviceError::Write(_))));
        assert_eq!(playback.blocks.len(), 2);
        assert_eq!(playback.events, ["start", "stop"]);
    }
}
