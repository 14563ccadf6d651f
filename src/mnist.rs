use anyhow::{Context, Result, ensure};
use flate2::read::GzDecoder;
use itertools::Itertools;
use log::info;
use ndarray::{Array1, Array2};
use std::{fs::File, io::Read, path::Path};

// IDX image files start with four big-endian u32s (magic number, image count, rows, columns) and
// label files with two (magic number, label count). Both headers are skipped: the image count is
// taken from the payload length instead.
pub const IMAGE_HEADER_LEN: usize = 16;
pub const LABEL_HEADER_LEN: usize = 8;
pub const IMAGE_PIXELS: usize = 28 * 28;

// A set of examples: `x` has one row per example, `y` the class index of each row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<A> {
    pub x: Array2<A>,
    pub y: Array1<u8>,
}

impl<A> Dataset<A> {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

pub struct MnistData {
    pub training_data: Dataset<f32>,
    pub test_data: Dataset<f32>,
}

impl MnistData {
    // Loads the standard training and test files from `dir`.
    pub fn load(dir: &Path) -> Result<MnistData> {
        let training_data = parse_mnist(
            &dir.join("train-images-idx3-ubyte.gz"),
            &dir.join("train-labels-idx1-ubyte.gz"),
        )?;
        let test_data = parse_mnist(
            &dir.join("t10k-images-idx3-ubyte.gz"),
            &dir.join("t10k-labels-idx1-ubyte.gz"),
        )?;
        info!(
            "loaded {} training and {} test examples from {}",
            training_data.len(),
            test_data.len(),
            dir.display()
        );

        Ok(MnistData {
            training_data,
            test_data,
        })
    }
}

// Reads a gzipped image file and its gzipped label file into pixels scaled to [0, 1] and labels.
pub fn parse_mnist(image_path: &Path, label_path: &Path) -> Result<Dataset<f32>> {
    let x = decode_images(&read_gz(image_path)?)
        .with_context(|| format!("decoding images from {}", image_path.display()))?;
    let y = decode_labels(&read_gz(label_path)?)
        .with_context(|| format!("decoding labels from {}", label_path.display()))?;

    ensure!(
        x.nrows() == y.len(),
        "{} holds {} images but {} holds {} labels",
        image_path.display(),
        x.nrows(),
        label_path.display(),
        y.len()
    );

    Ok(Dataset { x, y })
}

fn read_gz(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    Ok(bytes)
}

// Decodes an uncompressed image file into an (images x 784) matrix of pixel values divided by 255.
pub fn decode_images(bytes: &[u8]) -> Result<Array2<f32>> {
    ensure!(
        bytes.len() >= IMAGE_HEADER_LEN,
        "image data is {} bytes, shorter than the {IMAGE_HEADER_LEN}-byte header",
        bytes.len()
    );
    let pixels = &bytes[IMAGE_HEADER_LEN..];
    ensure!(
        pixels.len() % IMAGE_PIXELS == 0,
        "{} bytes of pixels is not a whole number of {IMAGE_PIXELS}-pixel images",
        pixels.len()
    );

    let images = pixels.len() / IMAGE_PIXELS;
    let scaled = pixels
        .iter()
        .map(|&pixel| f32::from(pixel) / 255.0)
        .collect_vec();
    Ok(Array2::from_shape_vec((images, IMAGE_PIXELS), scaled)?)
}

// Decodes an uncompressed label file.
pub fn decode_labels(bytes: &[u8]) -> Result<Array1<u8>> {
    ensure!(
        bytes.len() >= LABEL_HEADER_LEN,
        "label data is {} bytes, shorter than the {LABEL_HEADER_LEN}-byte header",
        bytes.len()
    );
    Ok(Array1::from(bytes[LABEL_HEADER_LEN..].to_vec()))
}
