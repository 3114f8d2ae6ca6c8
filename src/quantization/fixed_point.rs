use super::Quantizer;

/// Qm.n fixed point with `shift` fractional bits, stored as i8.
///
/// encode: round(x * 2^shift), ties to even, saturated to [-128, 127]
/// decode: q / 2^shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    pub shift: i32,
}

impl FixedPoint {
    pub fn new(shift: i32) -> Self {
        FixedPoint { shift }
    }

    /// Size of one quantization step, 2^-shift
    pub fn step(&self) -> f32 {
        2f32.powi(-self.shift)
    }

    pub fn encode(&self, real_val: f32) -> i8 {
        (real_val * 2f32.powi(self.shift))
            .round_ties_even()
            .clamp(-128., 127.) as i8
    }

    pub fn decode(&self, q_val: i8) -> f32 {
        q_val as f32 * self.step()
    }

    /// Row-major two's-complement bytes, the layout of the runtime's `.raw` files
    pub fn encode_bytes(&self, values: &[f32]) -> Vec<u8> {
        super::quantize_to_bytes(self, values)
    }

    pub fn decode_bytes(&self, bytes: &[u8]) -> Vec<f32> {
        super::dequantize_bytes(self, bytes)
    }
}

impl Quantizer for FixedPoint {
    fn quantize(&self, real_val: f32) -> i8 {
        self.encode(real_val)
    }

    fn dequantize(&self, q_val: i8) -> f32 {
        self.decode(q_val)
    }
}
