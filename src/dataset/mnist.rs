use std::fs::{self, create_dir_all};
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::data::dataset::{
    transform::{Mapper, MapperDataset},
    Dataset, InMemDataset,
};
use flate2::read::GzDecoder;

use super::DatasetError;
use crate::data::{DigitItem, HEIGHT, NUM_CLASSES, WIDTH};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;
const IMAGES_HEADER: usize = 16;
const LABELS_HEADER: usize = 8;

/// Number of training images in the published dataset.
pub const MNIST_TRAIN_LEN: usize = 60_000;
/// Number of test images in the published dataset.
pub const MNIST_TEST_LEN: usize = 10_000;

/// One of the two published MNIST partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MnistSplit {
    Train,
    Test,
}

impl MnistSplit {
    fn name(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }

    /// Number of images in the published partition.
    pub fn published_len(&self) -> usize {
        match self {
            Self::Train => MNIST_TRAIN_LEN,
            Self::Test => MNIST_TEST_LEN,
        }
    }

    fn files(&self) -> (&'static str, &'static str) {
        match self {
            Self::Train => (TRAIN_IMAGES, TRAIN_LABELS),
            Self::Test => (TEST_IMAGES, TEST_LABELS),
        }
    }
}

#[derive(Debug, Clone)]
struct MnistItemRaw {
    image_bytes: Vec<u8>,
    label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, DigitItem> for BytesToImage {
    /// Convert raw image bytes to a normalized 2D image.
    fn map(&self, item: &MnistItemRaw) -> DigitItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);

        let mut image = [[0f32; WIDTH]; HEIGHT];
        for (i, pixel) in item.image_bytes.iter().enumerate() {
            image[i / WIDTH][i % WIDTH] = *pixel as f32 / 255.0;
        }

        DigitItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// The MNIST handwritten digits: 60,000 training and 10,000 test images of 28x28 pixels.
///
/// Images are kept in memory as raw bytes and normalized when an item is read.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<DigitItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<DigitItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Loads the training partition, downloading it into the user cache when missing.
    pub fn train() -> Result<Self, DatasetError> {
        Self::cached(MnistSplit::Train)
    }

    /// Loads the test partition, downloading it into the user cache when missing.
    pub fn test() -> Result<Self, DatasetError> {
        Self::cached(MnistSplit::Test)
    }

    /// Loads a partition from uncompressed IDX files stored in `root`.
    pub fn from_dir<P: AsRef<Path>>(root: P, split: MnistSplit) -> Result<Self, DatasetError> {
        let (images_file, labels_file) = split.files();
        let images = parse_images(&read_file(&root.as_ref().join(images_file))?)?;
        let labels = parse_labels(&read_file(&root.as_ref().join(labels_file))?)?;

        if images.len() != labels.len() {
            return Err(DatasetError::Format(format!(
                "{} images but {} labels in the {} split",
                images.len(),
                labels.len(),
                split.name()
            )));
        }

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();

        log::info!("Loaded {} MNIST {} images", items.len(), split.name());
        if items.len() != split.published_len() {
            log::warn!(
                "The published MNIST {} split has {} images, found {}",
                split.name(),
                split.published_len(),
                items.len()
            );
        }

        let dataset = MapperDataset::new(InMemDataset::new(items), BytesToImage);
        Ok(Self { dataset })
    }

    fn cached(split: MnistSplit) -> Result<Self, DatasetError> {
        let split_dir = dirs::cache_dir()
            .ok_or(DatasetError::NoCacheDir)?
            .join("mnist-tfjs")
            .join("mnist")
            .join(split.name());

        create_dir_all(&split_dir).map_err(|source| DatasetError::Io {
            path: split_dir.clone(),
            source,
        })?;

        let (images_file, labels_file) = split.files();
        download_file(images_file, &split_dir)?;
        download_file(labels_file, &split_dir)?;

        Self::from_dir(&split_dir, split)
    }
}

/// Download a gzip archive from the MNIST mirror and store its decoded content in `dest_dir`.
fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf, DatasetError> {
    let file_name = dest_dir.join(name);
    if file_name.exists() {
        return Ok(file_name);
    }

    let url = format!("{URL}{name}.gz");
    log::info!("Downloading {url}");

    let bytes = reqwest::blocking::get(&url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(|source| DatasetError::Download {
            url: url.clone(),
            source,
        })?;

    store_decoded(&bytes, &file_name)?;

    Ok(file_name)
}

/// Decode a gzip archive into `path` through a temporary file, so `path` only ever holds
/// complete data.
fn store_decoded(archive: &[u8], path: &Path) -> Result<(), DatasetError> {
    let mut decoded = Vec::new();
    GzDecoder::new(archive)
        .read_to_end(&mut decoded)
        .map_err(io_error(path))?;

    let partial = path.with_extension("part");
    fs::write(&partial, decoded).map_err(io_error(&partial))?;
    fs::rename(&partial, path).map_err(io_error(path))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError {
    let path = path.to_path_buf();
    move |source| DatasetError::Io { path, source }
}

fn read_file(path: &Path) -> Result<Vec<u8>, DatasetError> {
    fs::read(path).map_err(io_error(path))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, DatasetError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|chunk| <[u8; 4]>::try_from(chunk).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| DatasetError::Format(format!("header truncated at byte {offset}")))
}

/// Parse an IDX3 image file. Each image is returned as its raw row-major bytes.
pub(crate) fn parse_images(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DatasetError> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(DatasetError::Format(format!(
            "unexpected image file magic number {magic:#010x}"
        )));
    }

    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    if rows != HEIGHT || cols != WIDTH {
        return Err(DatasetError::Format(format!(
            "expected {HEIGHT}x{WIDTH} images, found {rows}x{cols}"
        )));
    }

    let size = WIDTH * HEIGHT;
    let body = &bytes[IMAGES_HEADER..];
    if body.len() < count * size {
        return Err(DatasetError::Format(format!(
            "image file declares {count} images but holds {} bytes of pixels",
            body.len()
        )));
    }

    Ok(body[..count * size]
        .chunks_exact(size)
        .map(<[u8]>::to_vec)
        .collect())
}

/// Parse an IDX1 label file.
pub(crate) fn parse_labels(bytes: &[u8]) -> Result<Vec<u8>, DatasetError> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(DatasetError::Format(format!(
            "unexpected label file magic number {magic:#010x}"
        )));
    }

    let count = read_u32(bytes, 4)? as usize;
    let labels = bytes
        .get(LABELS_HEADER..LABELS_HEADER + count)
        .ok_or_else(|| {
            DatasetError::Format(format!("label file declares {count} labels but is shorter"))
        })?;

    if let Some(label) = labels.iter().find(|label| **label as usize >= NUM_CLASSES) {
        return Err(DatasetError::Format(format!("label {label} is not a digit")));
    }

    Ok(labels.to_vec())
}
