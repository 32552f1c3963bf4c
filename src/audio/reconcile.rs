//! Playback framing for decoded audio.
//!
//! The decoder hands out one Opus frame at a time (960 samples for the
//! usual 20 ms packet) while the playback device wants blocks of a
//! configurable size. `FrameReconciler` sits between the two: decoded
//! samples are appended in arrival order and complete playback blocks are
//! cut from the front.

/// Elastic accumulator between decode units and playback blocks.
#[derive(Debug)]
pub struct FrameReconciler {
    pending: Vec<i16>,
    output_frames: usize,
}

impl FrameReconciler {
    /// Create an empty reconciler emitting blocks of `output_frames` samples.
    ///
    /// # Panics
    ///
    /// Panics if `output_frames` is zero; `RelayConfig` rejects that value
    /// before a reconciler is ever built.
    pub fn new(output_frames: usize) -> Self {
        assert!(output_frames > 0, "output_frames must be positive");
        Self {
            pending: Vec::new(),
            output_frames,
        }
    }

    /// Append decoded samples.
    pub fn push(&mut self, decoded: &[i16]) {
        self.pending.extend_from_slice(decoded);
    }

    /// Cut every complete playback block from the front of the buffer.
    ///
    /// Once the iterator is exhausted fewer than `output_frames` samples
    /// remain pending.
    pub fn drain(&mut self) -> Blocks<'_> {
        Blocks { reconciler: self }
    }

    /// Drop everything pending.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn output_frames(&self) -> usize {
        self.output_frames
    }
}

/// Iterator over complete playback blocks, see [`FrameReconciler::drain`].
pub struct Blocks<'a> {
    reconciler: &'a mut FrameReconciler,
}

impl Iterator for Blocks<'_> {
    type Item = Vec<i16>;

    fn next(&mut self) -> Option<Vec<i16>> {
        let n = self.reconciler.output_frames;
        if self.reconciler.pending.len() < n {
            return None;
        }
        Some(self.reconciler.pending.drain(..n).collect())
    }
}
