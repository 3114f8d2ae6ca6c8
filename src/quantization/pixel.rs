use super::Quantizer;

/// Divisor applied to raw 0..=255 pixel intensities
pub const PIXEL_DIVISOR: f32 = 8.0;

/// Maps pixel intensities into q7 without a bias: clip(floor(v / divisor), -128, 127).
///
/// Out-of-range values saturate. The same instance must be used for every dataset
/// partition, the runtime's input layer was calibrated against exactly this mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelQuantizer {
    pub divisor: f32,
}

impl PixelQuantizer {
    pub fn new(divisor: f32) -> Self {
        assert!(divisor > 0., "pixel divisor must be positive");
        PixelQuantizer { divisor }
    }
}

impl Default for PixelQuantizer {
    fn default() -> Self {
        Self::new(PIXEL_DIVISOR)
    }
}

impl Quantizer for PixelQuantizer {
    fn quantize(&self, real_val: f32) -> i8 {
        (real_val / self.divisor).floor().clamp(-128., 127.) as i8
    }

    fn dequantize(&self, q_val: i8) -> f32 {
        q_val as f32 * self.divisor
    }
}
