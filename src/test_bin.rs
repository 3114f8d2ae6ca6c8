//! Labelled test data for the on-device runtime's self test.
//!
//! Layout, repeated per pack of [`PACK_SIZE`] samples: the pack's labels (one byte
//! each) followed by the pack's images (q7, row-major). A trailing partial pack is
//! not written.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::dataset::Label;
use crate::error::{Error, Result};
use crate::quantization::{dec_bits_for_range, FixedPoint};
use crate::tensor::Tensor;

pub const PACK_SIZE: usize = 128;

/// Writes complete packs to `writer` and returns the number of samples written.
///
/// Images are encoded with the fractional bits that fit their overall range.
/// Fails with `InvalidInput` unless there is one label per image.
pub fn write_test_bin(
    images: &Tensor<f32>,
    labels: &[Label],
    writer: &mut impl Write,
) -> io::Result<usize> {
    if images.batch() != labels.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} images but {} labels", images.batch(), labels.len()),
        ));
    }

    let fp = match images.min_and_max() {
        Some((lo, hi)) => FixedPoint::new(dec_bits_for_range(lo, hi)),
        None => return Ok(0),
    };
    tracing::debug!("Encoding test data with {} fractional bits", fp.shift);

    let packs = labels.len() / PACK_SIZE;
    let pack_len = PACK_SIZE * images.sample_len();
    for pack in 0..packs {
        let start = pack * PACK_SIZE;
        let label_bytes: Vec<u8> = labels[start..start + PACK_SIZE]
            .iter()
            .map(|l| l.index() as u8)
            .collect();
        writer.write_all(&label_bytes)?;

        let data = &images.data[start * images.sample_len()..][..pack_len];
        writer.write_all(&fp.encode_bytes(data))?;
    }

    if packs * PACK_SIZE < labels.len() {
        tracing::warn!(
            "Dropped {} samples that do not fill a pack of {PACK_SIZE}",
            labels.len() - packs * PACK_SIZE
        );
    }
    Ok(packs * PACK_SIZE)
}

/// Writes the test binary to `path`, returning the number of samples written
pub fn export_test_bin(
    images: &Tensor<f32>,
    labels: &[Label],
    path: impl AsRef<Path>,
) -> Result<usize> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);

    let written = write_test_bin(images, labels, &mut writer)
        .and_then(|n| writer.flush().map(|_| n))
        .map_err(|e| Error::io(path, e))?;

    tracing::info!("Wrote {written} test samples to {}", path.display());
    Ok(written)
}
