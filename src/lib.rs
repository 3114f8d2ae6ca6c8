//! Quantized MNIST data preparation and accuracy validation for an 8-bit fixed-point
//! inference runtime.

pub mod dataset;
pub mod error;
pub mod exchange;
pub mod quantization;
pub mod shift_table;
pub mod tensor;
pub mod test_bin;
pub mod validation;

pub use error::{Error, Result};
