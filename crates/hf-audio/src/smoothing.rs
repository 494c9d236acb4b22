/// Exponential moving average over a single scalar stream.
///
/// The first `step` seeds the value directly, so a stream never ramps up
/// from an arbitrary zero state.
///
/// # Example
/// ```
/// use hf_audio::smoothing::Smoother;
/// let mut s = Smoother::new(0.5);
/// assert!((s.step(10.0) - 10.0).abs() < f32::EPSILON);
/// assert!((s.step(20.0) - 15.0).abs() < f32::EPSILON);
/// ```
#[derive(Clone, Debug)]
pub struct Smoother {
    alpha: f32,
    initialized: bool,
    value: f32,
}

impl Smoother {
    /// Create a smoother. `alpha` is clamped to [0, 1]; smaller is smoother.
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) },
            initialized: false,
            value: 0.0,
        }
    }

    /// Feed a new value and return the smoothed one.
    #[inline]
    pub fn step(&mut self, v: f32) -> f32 {
        if !self.initialized {
            self.value = v;
            self.initialized = true;
            return v;
        }
        self.value += self.alpha * (v - self.value);
        self.value
    }

    /// Current value without updating it.
    #[inline]
    #[must_use]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Effective (clamped) alpha.
    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_seeds_without_blending() {
        let mut s = Smoother::new(0.1);
        assert!((s.step(0.8) - 0.8).abs() < f32::EPSILON);
        assert!((s.value() - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn converges_toward_constant_input() {
        let mut s = Smoother::new(0.2);
        s.step(0.0);
        let mut prev_gap = 1.0f32;
        for _ in 0..50 {
            let v = s.step(1.0);
            let gap = 1.0 - v;
            assert!(gap < prev_gap);
            prev_gap = gap;
        }
        assert!(prev_gap < 1e-3);
    }

    #[test]
    fn alpha_is_clamped() {
        assert!((Smoother::new(3.0).alpha() - 1.0).abs() < f32::EPSILON);
        assert!(Smoother::new(-1.0).alpha().abs() < f32::EPSILON);
        assert!(Smoother::new(f32::NAN).alpha().abs() < f32::EPSILON);
    }
}
