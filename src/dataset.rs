//! MNIST in the IDX format, loaded fully in memory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Class index in `0..NUM_CLASSES`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(u8);

impl Label {
    pub fn new(class: u8) -> Result<Self> {
        if (class as usize) < NUM_CLASSES {
            Ok(Label(class))
        } else {
            Err(Error::Dataset(format!(
                "label {class} outside 0..{NUM_CLASSES}"
            )))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn one_hot(self) -> [f32; NUM_CLASSES] {
        let mut v = [0.; NUM_CLASSES];
        v[self.index()] = 1.;
        v
    }

    /// Inverse of [`Label::one_hot`]; requires exactly one 1 and zeros elsewhere
    pub fn from_one_hot(v: &[f32]) -> Result<Self> {
        let ones: Vec<usize> = v
            .iter()
            .enumerate()
            .filter(|&(_, &x)| x == 1.)
            .map(|(i, _)| i)
            .collect();
        let zeros = v.iter().filter(|&&x| x == 0.).count();

        match ones.as_slice() {
            [class] if v.len() == NUM_CLASSES && zeros == NUM_CLASSES - 1 => {
                Label::new(*class as u8)
            }
            _ => Err(Error::Dataset(format!("{v:?} is not a one-hot label"))),
        }
    }
}

/// Images as a batch x 28 x 28 x 1 tensor of 0..=255 intensities, with their labels
#[derive(Debug, Clone)]
pub struct MnistSplit {
    pub images: Tensor<f32>,
    pub labels: Vec<Label>,
}

impl MnistSplit {
    pub fn train(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(
            locate(dir, TRAIN_IMAGES)?,
            locate(dir, TRAIN_LABELS)?,
        )
    }

    pub fn test(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(locate(dir, TEST_IMAGES)?, locate(dir, TEST_LABELS)?)
    }

    pub fn load(images_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result<Self> {
        let images = read_images(&read_file(images_path.as_ref())?)?;
        let labels = read_labels(&read_file(labels_path.as_ref())?)?;

        if images.batch() != labels.len() {
            return Err(Error::Dataset(format!(
                "{} images but {} labels",
                images.batch(),
                labels.len()
            )));
        }

        tracing::info!(
            "Loaded {} samples from {}",
            labels.len(),
            images_path.as_ref().display()
        );
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Picks `name` or `name.gz` inside `dir`, preferring the uncompressed file
fn locate(dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = dir.join(name);
    if plain.exists() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{name}.gz"));
    if gz.exists() {
        return Ok(gz);
    }
    Err(Error::Dataset(format!(
        "neither {} nor {} exists",
        plain.display(),
        gz.display()
    )))
}

/// Whole file contents, gunzipped when the path ends in `.gz`
fn read_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut bytes = Vec::new();

    let read = if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(BufReader::new(file)).read_to_end(&mut bytes)
    } else {
        BufReader::new(file).read_to_end(&mut bytes)
    };
    read.map_err(|e| Error::io(path, e))?;

    Ok(bytes)
}

fn header(bytes: &[u8], magic: u32, fields: usize) -> Result<Vec<u32>> {
    let len = 4 * (fields + 1);
    if bytes.len() < len {
        return Err(Error::Dataset(format!(
            "IDX header needs {len} bytes, file has {}",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes[..len]
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    if words[0] != magic {
        return Err(Error::Dataset(format!(
            "bad IDX magic {:#010x}, expected {magic:#010x}",
            words[0]
        )));
    }
    Ok(words[1..].to_vec())
}

pub fn read_images(bytes: &[u8]) -> Result<Tensor<f32>> {
    let dims = header(bytes, IMAGES_MAGIC, 3)?;
    let (count, rows, cols) = (dims[0] as usize, dims[1] as usize, dims[2] as usize);
    if (rows, cols) != (HEIGHT, WIDTH) {
        return Err(Error::Dataset(format!(
            "images are {rows}x{cols}, expected {HEIGHT}x{WIDTH}"
        )));
    }

    let payload = &bytes[16..];
    let expected = count * rows * cols;
    if payload.len() < expected {
        return Err(Error::Dataset(format!(
            "truncated image data: {} of {expected} bytes",
            payload.len()
        )));
    }

    let data = payload[..expected].iter().map(|&p| p as f32).collect();
    Tensor::from_vec(data, [count, rows, cols, 1])
}

pub fn read_labels(bytes: &[u8]) -> Result<Vec<Label>> {
    let count = header(bytes, LABELS_MAGIC, 1)?[0] as usize;

    let payload = &bytes[8..];
    if payload.len() < count {
        return Err(Error::Dataset(format!(
            "truncated label data: {} of {count} bytes",
            payload.len()
        )));
    }

    payload[..count].iter().map(|&l| Label::new(l)).collect()
}
