/// Convertit HSV → RGB [0,255]. H ∈ [0.0, 1.0), S ∈ [0.0, 1.0], V ∈ [0.0, 1.0].
///
/// # Example
/// ```
/// use hf_core::color::hsv_to_rgb;
/// let (r, g, b) = hsv_to_rgb(0.0, 1.0, 1.0);
/// assert_eq!(r, 255);
/// assert_eq!(g, 0);
/// assert_eq!(b, 0);
/// ```
#[must_use]
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(1.0) * 6.0;
    let i = h.floor() as u32;
    let f = h - i as f32;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match i % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

/// Packs RGB into the `0xRRGGBB` integer most bulbs expect.
#[inline]
#[must_use]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// RGB of a bulb command: hue in degrees, saturation in percent, value forced to 1.0.
///
/// Brightness travels separately, so the color itself is always at full value.
///
/// # Example
/// ```
/// use hf_core::color::command_rgb;
/// assert_eq!(command_rgb(120, 100), 0x00FF00);
/// assert_eq!(command_rgb(0, 0), 0xFFFFFF);
/// ```
#[must_use]
pub fn command_rgb(hue: u16, saturation: u8) -> u32 {
    let (r, g, b) = hsv_to_rgb(
        f32::from(hue % 360) / 360.0,
        f32::from(saturation.min(100)) / 100.0,
        1.0,
    );
    pack_rgb(r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries() {
        assert_eq!(command_rgb(0, 100), 0xFF0000);
        assert_eq!(command_rgb(240, 100), 0x0000FF);
        assert_eq!(command_rgb(359, 0), 0xFFFFFF);
    }

    #[test]
    fn half_saturation_keeps_hue() {
        let (r, g, b) = hsv_to_rgb(0.0, 0.5, 1.0);
        assert_eq!(r, 255);
        assert_eq!(g, b);
        assert!(g > 100 && g < 150, "g = {g}");
    }
}
