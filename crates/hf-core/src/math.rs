/// Seuil sous lequel une énergie, une somme ou un dénominateur est considéré nul.
pub const EPSILON: f32 = 1e-9;

/// Normalized contribution of `a` within `a + b`.
///
/// Falls back to 0.5 (perfect balance) when both sides are silent or the
/// sum is not finite.
///
/// # Example
/// ```
/// use hf_core::math::spectral_balance;
/// assert!((spectral_balance(3.0, 1.0) - 0.75).abs() < 1e-6);
/// assert!((spectral_balance(0.0, 0.0) - 0.5).abs() < f32::EPSILON);
/// ```
#[inline]
#[must_use]
pub fn spectral_balance(a: f32, b: f32) -> f32 {
    let total = a + b;
    if !total.is_finite() || total <= EPSILON {
        return 0.5;
    }
    clamp_finite(a / total, 0.0, 1.0)
}

/// One exponential moving average step: `prev + alpha·(value − prev)`.
///
/// `alpha <= 0` keeps `prev`, `alpha >= 1` jumps to `value`.
#[inline]
#[must_use]
pub fn ema(prev: f32, value: f32, alpha: f32) -> f32 {
    if alpha <= 0.0 {
        return prev;
    }
    if alpha >= 1.0 {
        return value;
    }
    prev + alpha * (value - prev)
}

/// Clamp that tolerates NaN by mapping it to `min`.
///
/// Infinities clamp to the nearest bound like any other value.
///
/// # Example
/// ```
/// use hf_core::math::clamp_finite;
/// assert!((clamp_finite(f32::NAN, 1.0, 100.0) - 1.0).abs() < f32::EPSILON);
/// assert!((clamp_finite(f32::INFINITY, 0.0, 1.0) - 1.0).abs() < f32::EPSILON);
/// ```
#[inline]
#[must_use]
pub fn clamp_finite(v: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() { min } else { v.clamp(min, max) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_is_bounded_and_symmetric() {
        for &(a, b) in &[(0.0, 1.0), (1.0, 0.0), (0.2, 0.6), (1e-12, 1e-12)] {
            let x = spectral_balance(a, b);
            assert!((0.0..=1.0).contains(&x), "balance({a}, {b}) = {x}");
        }
        assert!((spectral_balance(0.2, 0.6) + spectral_balance(0.6, 0.2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn balance_of_non_finite_sides_is_neutral() {
        assert!((spectral_balance(f32::NAN, 1.0) - 0.5).abs() < f32::EPSILON);
        assert!((spectral_balance(f32::INFINITY, 1.0) - 0.5).abs() < f32::EPSILON);
        assert!((spectral_balance(f32::MAX, f32::MAX) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn ema_edges() {
        assert!((ema(1.0, 5.0, 0.0) - 1.0).abs() < f32::EPSILON);
        assert!((ema(1.0, 5.0, 1.0) - 5.0).abs() < f32::EPSILON);
        assert!((ema(1.0, 5.0, 0.25) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn clamp_finite_maps_nan_to_min() {
        assert!((clamp_finite(f32::NAN, 1.0, 100.0) - 1.0).abs() < f32::EPSILON);
        assert!((clamp_finite(250.0, 1.0, 100.0) - 100.0).abs() < f32::EPSILON);
    }
}
