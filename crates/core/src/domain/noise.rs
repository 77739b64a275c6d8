//! Procedural noise textures
//!
//! Two looped mono buffers generated once per session: broadband tape hiss and
//! sparse vinyl crackle. The render engine reads them through [`LoopCursor`]s
//! that start at position 0 on every play.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

/// Hiss loop length in seconds
pub const HISS_SECONDS: f32 = 2.0;
/// Crackle loop length in seconds
pub const CRACKLE_SECONDS: f32 = 5.0;
/// Per-sample probability of a crackle impulse (about 1 in 5000)
pub const CRACKLE_PROBABILITY: f64 = 0.0002;
/// Crackle impulses are uniform in [-CRACKLE_AMPLITUDE, CRACKLE_AMPLITUDE]
pub const CRACKLE_AMPLITUDE: f32 = 0.5;

/// Pre-generated noise material shared with the audio thread
#[derive(Debug, Clone)]
pub struct NoiseTextures {
    hiss: Arc<[f32]>,
    crackle: Arc<[f32]>,
    sample_rate: u32,
}

impl NoiseTextures {
    /// Generate both textures at `sample_rate`
    ///
    /// A fixed `seed` makes the output reproducible; `None` seeds from entropy.
    pub fn generate(sample_rate: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let hiss_len = ((sample_rate as f32 * HISS_SECONDS) as usize).max(1);
        let hiss: Vec<f32> = (0..hiss_len).map(|_| rng.gen_range(-1.0..=1.0)).collect();

        let crackle_len = ((sample_rate as f32 * CRACKLE_SECONDS) as usize).max(1);
        let crackle: Vec<f32> = (0..crackle_len)
            .map(|_| {
                if rng.gen_bool(CRACKLE_PROBABILITY) {
                    rng.gen_range(-CRACKLE_AMPLITUDE..=CRACKLE_AMPLITUDE)
                } else {
                    0.0
                }
            })
            .collect();

        debug!(
            sample_rate,
            hiss_len,
            crackle_len,
            impulses = crackle.iter().filter(|s| **s != 0.0).count(),
            "Noise textures generated"
        );

        Self {
            hiss: Arc::from(hiss),
            crackle: Arc::from(crackle),
            sample_rate,
        }
    }

    pub fn hiss(&self) -> &Arc<[f32]> {
        &self.hiss
    }

    pub fn crackle(&self) -> &Arc<[f32]> {
        &self.crackle
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hiss_cursor(&self) -> LoopCursor {
        LoopCursor::new(Arc::clone(&self.hiss))
    }

    pub fn crackle_cursor(&self) -> LoopCursor {
        LoopCursor::new(Arc::clone(&self.crackle))
    }
}

/// Read head over a looping buffer; wraps seamlessly at the end
#[derive(Debug, Clone)]
pub struct LoopCursor {
    buffer: Arc<[f32]>,
    position: usize,
}

impl LoopCursor {
    pub fn new(buffer: Arc<[f32]>) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        let sample = self.buffer[self.position];
        self.position += 1;
        if self.position == self.buffer.len() {
            self.position = 0;
        }
        sample
    }

    /// Fill `out` with the next `out.len()` samples
    pub fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }
}
