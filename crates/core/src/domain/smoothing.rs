//! Exponential parameter smoothing
//!
//! Every continuously-controlled stage value glides toward its target with a
//! one-pole exponential approach, evaluated by the audio thread once per
//! sample. The control thread only ever moves the target.

/// Default time constant: ~63% of a step is covered in 50 ms
pub const DEFAULT_TIME_CONSTANT_SECS: f32 = 0.05;

/// A smoothed parameter with range constraints
///
/// The state is kept in `f64` so that large values (filter cutoffs in the kHz
/// range) still converge all the way instead of stalling a few ulps short.
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    current: f64,
    target: f64,
    /// Per-sample approach coefficient, 1 - e^(-1 / (tau * fs))
    coeff: f64,
    settled: bool,
    min: f32,
    max: f32,
}

impl SmoothedParam {
    /// Create a parameter resting at `initial` (clamped to `[min, max]`)
    pub fn new(initial: f32, min: f32, max: f32, sample_rate: f32, time_constant_secs: f32) -> Self {
        let clamped = initial.clamp(min, max) as f64;
        Self {
            current: clamped,
            target: clamped,
            coeff: Self::calculate_coeff(sample_rate, time_constant_secs),
            settled: true,
            min,
            max,
        }
    }

    fn calculate_coeff(sample_rate: f32, time_constant_secs: f32) -> f64 {
        if time_constant_secs <= 0.0 || sample_rate <= 0.0 {
            return 1.0;
        }
        let tau_samples = time_constant_secs as f64 * sample_rate as f64;
        1.0 - (-1.0 / tau_samples).exp()
    }

    /// Move the target; the value will glide there
    pub fn set_target(&mut self, target: f32) {
        let clamped = if target.is_nan() {
            self.min
        } else {
            target.clamp(self.min, self.max)
        } as f64;
        if clamped != self.target {
            self.target = clamped;
            self.settled = clamped == self.current;
        }
    }

    /// Jump straight to `value` without smoothing
    pub fn set_immediate(&mut self, value: f32) {
        self.set_target(value);
        self.current = self.target;
        self.settled = true;
    }

    /// Advance one sample and return the smoothed value
    #[inline]
    pub fn tick(&mut self) -> f32 {
        if !self.settled {
            self.current += self.coeff * (self.target - self.current);
            if (self.current - self.target).abs() <= Self::tolerance(self.target) {
                self.current = self.target;
                self.settled = true;
            }
        }
        self.current as f32
    }

    /// Advance `samples` samples at once (closed form of `samples` ticks)
    pub fn advance(&mut self, samples: usize) -> f32 {
        if !self.settled && samples > 0 {
            let remaining = (1.0 - self.coeff).powi(samples.min(i32::MAX as usize) as i32);
            self.current = self.target + (self.current - self.target) * remaining;
            if (self.current - self.target).abs() <= Self::tolerance(self.target) {
                self.current = self.target;
                self.settled = true;
            }
        }
        self.current as f32
    }

    #[inline]
    fn tolerance(target: f64) -> f64 {
        1e-7 * target.abs().max(1.0)
    }

    /// Current smoothed value without advancing
    #[inline]
    pub fn get(&self) -> f32 {
        self.current as f32
    }

    pub fn target(&self) -> f32 {
        self.target as f32
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Recompute the coefficient for a new rate or time constant
    pub fn set_time_constant(&mut self, sample_rate: f32, time_constant_secs: f32) {
        self.coeff = Self::calculate_coeff(sample_rate, time_constant_secs);
    }
}
