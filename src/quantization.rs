//! 8-bit signed quantization schemes.
//!
//! Two schemes share the [`Quantizer`] interface: [`PixelQuantizer`] turns raw pixel
//! intensities into the q7 input domain, and [`FixedPoint`] is the Qm.n power-of-two
//! encoding the on-device runtime uses for every named tensor.

pub mod fixed_point;
pub mod pixel;

pub use fixed_point::FixedPoint;
pub use pixel::PixelQuantizer;

pub trait Quantizer {
    fn quantize(&self, real_val: f32) -> i8;
    fn dequantize(&self, q_val: i8) -> f32;
}

/// Quantize a slice into two's-complement bytes, preserving order
pub fn quantize_to_bytes(quantizer: &impl Quantizer, values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .map(|&v| quantizer.quantize(v) as u8)
        .collect()
}

/// Reinterpret bytes as signed 8-bit values and dequantize them
pub fn dequantize_bytes(quantizer: &impl Quantizer, bytes: &[u8]) -> Vec<f32> {
    bytes
        .iter()
        .map(|&b| quantizer.dequantize(b as i8))
        .collect()
}

/// Given the real range of some data, returns the number of fractional bits that fits
/// its absolute maximum into q7:
/// 7 - ceil(log2(max(|min_val|, |max_val|)))
///
/// The result is negative when the data exceeds 127 and larger than 7 for data below 1/2.
/// All-zero (or non-finite) ranges get the full 7 fractional bits.
pub fn dec_bits_for_range(min_val: f32, max_val: f32) -> i32 {
    let max_abs = min_val.abs().max(max_val.abs());
    if max_abs == 0. || !max_abs.is_finite() {
        return 7;
    }

    let int_bits = max_abs.log2().ceil() as i32;
    7 - int_bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dec_bits_for_pixel_ranges() {
        // raw pixels 0..=255 need a negative shift
        assert_eq!(dec_bits_for_range(0., 255.), -1);
        // pixels already divided by 8
        assert_eq!(dec_bits_for_range(0., 31.), 2);
        assert_eq!(dec_bits_for_range(0., 127.), 0);
        assert_eq!(dec_bits_for_range(-1., 0.5), 7);
        assert_eq!(dec_bits_for_range(0., 0.2), 9);
        assert_eq!(dec_bits_for_range(0., 0.), 7);
    }

    #[test]
    fn bytes_are_twos_complement() {
        let fp = FixedPoint::new(0);
        assert_eq!(quantize_to_bytes(&fp, &[-1., 0., 127., -128.]), vec![0xFF, 0, 0x7F, 0x80]);
        assert_eq!(dequantize_bytes(&fp, &[0xFF, 0x80]), vec![-1., -128.]);
    }
}
