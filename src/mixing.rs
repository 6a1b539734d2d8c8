//! Integer mixing of 16-bit sample streams.
//!
//! [`MixBuffer`] sums any number of volume-scaled streams in 32-bit cells and
//! converts the result back to clipped 16-bit or normalized `f32` output.
//! Gains are quantized to fixed point where [`UNITY_GAIN`] (256) is 1.0.

/// Fixed-point gain factor for a volume of 1.0
pub const UNITY_GAIN: i32 = 256;

/// Full-scale magnitude of an accumulated cell, used for `f32` output
const FULL_SCALE: f32 = 32768.0 * UNITY_GAIN as f32;

fn gain_factor(volume: f32) -> i32 {
    (UNITY_GAIN as f32 * volume) as i32
}

/// Accumulator for mixing several streams into one buffer.
///
/// Writes before a read are summed. A read converts everything written so
/// far and empties the buffer; the backing allocation is kept for the next
/// cycle, so a buffer created with enough capacity never allocates again.
#[derive(Debug, Clone)]
pub struct MixBuffer {
    mixbuf: Vec<i32>,
    used: usize,
    factor: i32,
}

impl Default for MixBuffer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl MixBuffer {
    /// Create an empty buffer whose default gain is `volume`
    pub fn new(volume: f32) -> Self {
        Self::with_capacity(0, volume)
    }

    /// Create an empty buffer with room for `samples` cells
    pub fn with_capacity(samples: usize, volume: f32) -> Self {
        Self {
            mixbuf: Vec::with_capacity(samples),
            used: 0,
            factor: gain_factor(volume),
        }
    }

    /// Set the gain applied by `write` calls that pass no volume
    pub fn set_volume(&mut self, volume: f32) {
        self.factor = gain_factor(volume);
    }

    /// Default gain, as quantized
    pub fn volume(&self) -> f32 {
        self.factor as f32 / UNITY_GAIN as f32
    }

    /// Number of valid samples written since the last read
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Add `samples`, scaled by `volume` (or the default gain), starting at
    /// cell `offset`.
    ///
    /// Cells between the current valid length and `offset` are zeroed, so
    /// writing past the end leaves silence in the gap.
    pub fn write(&mut self, samples: &[i16], volume: Option<f32>, offset: usize) {
        let factor = volume.map(gain_factor).unwrap_or(self.factor);
        let end = offset + samples.len();

        if self.used < end {
            if self.mixbuf.len() < end {
                self.mixbuf.resize(end, 0);
            }
            self.mixbuf[self.used..end].fill(0);
            self.used = end;
        }

        for (cell, &sample) in self.mixbuf[offset..end].iter_mut().zip(samples) {
            *cell = cell.saturating_add(i32::from(sample).saturating_mul(factor));
        }
    }

    /// Convert the mix to 16-bit samples, clamping out-of-range values.
    ///
    /// Returns the number of samples written to `out` and empties the buffer.
    pub fn read_i16(&mut self, out: &mut [i16]) -> usize {
        let count = self.used.min(out.len());
        for (dst, &cell) in out.iter_mut().zip(&self.mixbuf[..count]) {
            *dst = (cell / UNITY_GAIN).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
        self.used = 0;
        count
    }

    /// Convert the mix to `f32` samples in `[-1.0, 1.0]`.
    ///
    /// Returns the number of samples written to `out` and empties the buffer.
    pub fn read_f32(&mut self, out: &mut [f32]) -> usize {
        let count = self.used.min(out.len());
        for (dst, &cell) in out.iter_mut().zip(&self.mixbuf[..count]) {
            *dst = (cell as f32 / FULL_SCALE).clamp(-1.0, 1.0);
        }
        self.used = 0;
        count
    }
}

/// Scale a 16-bit buffer in place
pub fn attenuate(buf: &mut [i16], volume: f32) {
    for sample in buf.iter_mut() {
        *sample = (f32::from(*sample) * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}
