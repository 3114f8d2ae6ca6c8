use std::ops::Range;

use rand::Rng;

use crate::error::{Error, Result};
use crate::quantization::Quantizer;

/// Rank-4 tensor in NHWC order (batch, height, width, channel), stored row-major
#[derive(PartialEq, Debug, Clone)]
pub struct Tensor<T> {
    pub data: Vec<T>,
    pub shape: [usize; 4],
}

impl<T> Tensor<T>
where
    T: Copy + Default,
{
    pub fn new(shape: [usize; 4]) -> Self {
        Self {
            data: vec![T::default(); shape.iter().product()],
            shape,
        }
    }

    pub fn from_vec(data: Vec<T>, shape: [usize; 4]) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// Number of samples along the batch axis
    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    /// Elements in one sample (height * width * channel)
    pub fn sample_len(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    /// Flattened row-major view of sample `i`, i.e. the sample reshaped to 1xHxWxC
    pub fn sample(&self, i: usize) -> &[T] {
        let len = self.sample_len();
        &self.data[i * len..(i + 1) * len]
    }

    pub fn samples(&self) -> impl Iterator<Item = &[T]> {
        // chunks() panics on a zero chunk size
        self.data.chunks(self.sample_len().max(1))
    }

    pub fn reshape(self, shape: [usize; 4]) -> Result<Self> {
        Self::from_vec(self.data, shape)
    }

    /// First `n` samples (or all of them if the batch is smaller)
    pub fn take(&self, n: usize) -> Self {
        let n = n.min(self.batch());
        let mut shape = self.shape;
        shape[0] = n;
        Self {
            data: self.data[..n * self.sample_len()].to_vec(),
            shape,
        }
    }
}

impl Tensor<f32> {
    /// Quantize every element with the same quantizer
    pub fn quantize(&self, quantizer: &impl Quantizer) -> Tensor<i8> {
        Tensor {
            data: self.data.iter().map(|&v| quantizer.quantize(v)).collect(),
            shape: self.shape,
        }
    }

    pub fn random(shape: [usize; 4], range: Range<f32>) -> Self {
        let size = shape.iter().product();
        let mut data = Vec::<f32>::with_capacity(size);

        let mut rng = rand::rng();

        for _ in 0..size {
            data.push(rng.random_range(range.clone()));
        }

        Tensor { data, shape }
    }

    /// Returns `None` for an empty tensor. NaNs are ignored.
    pub fn min_and_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

impl Tensor<i8> {
    pub fn dequantize(&self, quantizer: &impl Quantizer) -> Tensor<f32> {
        Tensor {
            data: self.data.iter().map(|&q| quantizer.dequantize(q)).collect(),
            shape: self.shape,
        }
    }

    pub fn min_and_max(&self) -> Option<(i8, i8)> {
        Some((*self.data.iter().min()?, *self.data.iter().max()?))
    }
}
