/****************************************************************
 * $ID: dataset.rs  	Thu 15 Oct 2026 10:31:05+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2026 M.H.Fan, All rights reserved.             *
 ****************************************************************/

//  http://yann.lecun.com/exdb/mnist/ (IDX file format)
//  https://github.com/tracel-ai/burn/blob/main/crates/burn-dataset/src/vision/mnist.rs

use std::{fs, io::Read, marker::PhantomData, path::Path};
use burn::data::dataset::{Dataset, InMemDataset, vision::MnistItem};
use burn_common::network::downloader::download_file_as_bytes;
use flate2::read::GzDecoder;
use crate::error::{Error, Result};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";

const  IMAGES_MAGIC: u32 = 2051;
const  LABELS_MAGIC: u32 = 2049;
pub const WIDTH:  usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)] pub enum Split { Train, Test, }

impl Split {
    pub fn name(self) -> &'static str { match self { Self::Train => "train", Self::Test => "test" } }

    /// (images, labels) file names, without the `.gz` suffix used on the mirror
    fn files(self) -> (&'static str, &'static str) {  match self {
        Self::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
        Self::Test  => ( "t10k-images-idx3-ubyte",  "t10k-labels-idx1-ubyte"),
    } }
}

/// MNIST split held in memory: 60,000 train or 10,000 test 28x28 grayscale digits.
pub struct MnistDataset { dataset: InMemDataset<MnistItem>, }

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> { self.dataset.get(index) }
    fn len(&self) -> usize { self.dataset.len() }
}

impl MnistDataset {
    pub fn train<P: AsRef<Path>>(root: P) -> Result<Self> { Self::new(root.as_ref(), Split::Train) }
    pub fn  test<P: AsRef<Path>>(root: P) -> Result<Self> { Self::new(root.as_ref(), Split::Test) }

    /// Load a split from `<root>/mnist/<split>/`, downloading the missing files first.
    pub fn new(root: &Path, split: Split) -> Result<Self> {
        let dir = root.join("mnist").join(split.name());
        fs::create_dir_all(&dir)?;

        let (images, labels) = split.files();
        Self::from_idx(&fetch(images, &dir)?, &fetch(labels, &dir)?)
    }

    /// Parse the decompressed IDX image and label files of one split.
    pub fn from_idx(images: &[u8], labels: &[u8]) -> Result<Self> {
        let (dims, pixels) = parse_idx("images", images, IMAGES_MAGIC, 3)?;
        if dims[1] != HEIGHT || dims[2] != WIDTH {
            return Err(idx_error("images", format!("{}x{} images, expected {HEIGHT}x{WIDTH}",
                dims[1], dims[2])));
        }
        let (count, labels) = parse_idx("labels", labels, LABELS_MAGIC, 1)?;
        if dims[0] != count[0] {
            return Err(idx_error("labels", format!("{} labels for {} images", count[0], dims[0])));
        }
        if let Some(label) = labels.iter().find(|&&label| NUM_CLASSES <= label as usize) {
            return Err(idx_error("labels", format!("label {label} out of range")));
        }

        let items = pixels.chunks_exact(WIDTH * HEIGHT).zip(labels).map(|(bytes, &label)| {
            let mut image = [[0f32; WIDTH]; HEIGHT];
            bytes.iter().enumerate().for_each(|(i, &pixel)|
                image[i / WIDTH][i % WIDTH] = pixel as f32);
            MnistItem { image, label }
        }).collect();

        Ok(Self { dataset: InMemDataset::new(items) })
    }
}

/// Read a decompressed IDX file from the cache dir, or download and decompress it there.
fn fetch(name: &str, dir: &Path) -> Result<Vec<u8>> {
    let path = dir.join(name);
    if path.exists() { return Ok(fs::read(&path)?) }

    let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);
    let mut raw = Vec::new();
    GzDecoder::new(&bytes[..]).read_to_end(&mut raw)?;

    // never leave a truncated file behind under the final name
    let part = path.with_extension("part");
    fs::write(&part, &raw).and_then(|_| fs::rename(&part, &path))?;
    log::info!("Downloaded {name} into {}", dir.display());     Ok(raw)
}

/// Check the big-endian header, return its dimensions and the complete payload.
fn parse_idx<'a>(name: &str, bytes: &'a [u8], magic: u32, rank: usize)
    -> Result<(Vec<usize>, &'a [u8])> {
    let header = 4 * (1 + rank);
    if bytes.len() < header { return Err(idx_error(name, "truncated header".into())) }

    let mut words = bytes[..header].chunks_exact(4)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]));
    let found = words.next().unwrap_or_default();
    if found != magic {
        return Err(idx_error(name, format!("magic number {found}, expected {magic}")));
    }

    let dims: Vec<_> = words.map(|dim| dim as usize).collect();
    let size = dims.iter().try_fold(1usize, |size, &dim| size.checked_mul(dim))
        .ok_or_else(|| idx_error(name, format!("dimensions {dims:?} overflow")))?;
    let payload = &bytes[header..];
    if payload.len() < size {
        return Err(idx_error(name, format!("{} bytes of payload, expected {size}", payload.len())));
    }

    Ok((dims, &payload[..size]))
}

fn idx_error(name: &str, reason: String) -> Error { Error::Idx { name: name.into(), reason } }

/// Every `step`-th item of the inner dataset: indices 0, step, 2 * step, ...
pub struct StridedDataset<D, I> {
    dataset: D,
    step: usize,
    _item: PhantomData<fn() -> I>,
}

impl<D: Dataset<I>, I> StridedDataset<D, I> {
    pub fn new(dataset: D, step: usize) -> Result<Self> {
        if step == 0 { return Err(Error::Config("subset step must be positive".into())) }
        Ok(Self { dataset, step, _item: PhantomData })
    }
}

impl<D: Dataset<I>, I> Dataset<I> for StridedDataset<D, I> {
    fn get(&self, index: usize) -> Option<I> {
        if self.len() <= index { return None }
        self.dataset.get(index * self.step)
    }

    fn len(&self) -> usize { self.dataset.len().div_ceil(self.step) }
}

#[cfg(test)] pub(crate) mod tests {
use super::*;

/// Synthetic IDX pair whose every pixel of image `i` equals `i`.
pub(crate) fn idx_files(labels: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let count = labels.len() as u32;
    let mut images = [IMAGES_MAGIC, count, HEIGHT as u32, WIDTH as u32]
        .iter().flat_map(|word| word.to_be_bytes()).collect::<Vec<_>>();
    (0..labels.len()).for_each(|i| images.extend([i as u8; WIDTH * HEIGHT]));

    let mut idx_labels = [LABELS_MAGIC, count].iter()
        .flat_map(|word| word.to_be_bytes()).collect::<Vec<_>>();
    idx_labels.extend_from_slice(labels);     (images, idx_labels)
}

#[test] fn parse_idx_pair() -> Result<(), Box<dyn std::error::Error>> {
    let (images, labels) = idx_files(&[7, 2, 1]);
    let dataset = MnistDataset::from_idx(&images, &labels)?;
    assert_eq!(dataset.len(), 3);

    let item = dataset.get(2).ok_or("missing item")?;
    assert_eq!(item.label, 1);
    assert!(item.image.iter().flatten().all(|&pixel| pixel == 2.0));
    assert!(dataset.get(3).is_none());      Ok(())
}

#[test] fn reject_malformed_idx() {
    let (mut images, labels) = idx_files(&[3, 4]);
    let short = MnistDataset::from_idx(&images[..images.len() - 1], &labels);
    assert!(matches!(short, Err(Error::Idx { .. })));

    let (_, fewer) = idx_files(&[3]);
    assert!(matches!(MnistDataset::from_idx(&images, &fewer), Err(Error::Idx { .. })));
    assert!(matches!(MnistDataset::from_idx(&labels, &labels), Err(Error::Idx { .. })));
    assert!(matches!(MnistDataset::from_idx(&images[..8], &labels), Err(Error::Idx { .. })));

    images[3] = 0x02;   // 2050: neither images nor labels
    assert!(matches!(MnistDataset::from_idx(&images, &labels), Err(Error::Idx { .. })));

    let (images, labels) = idx_files(&[3, 10]);
    assert!(matches!(MnistDataset::from_idx(&images, &labels), Err(Error::Idx { .. })));

    let huge = [IMAGES_MAGIC, u32::MAX, u32::MAX, u32::MAX]
        .iter().flat_map(|word| word.to_be_bytes()).collect::<Vec<_>>();
    assert!(matches!(MnistDataset::from_idx(&huge, &labels), Err(Error::Idx { .. })));
}

#[test] fn strided_subset() -> Result<(), Box<dyn std::error::Error>> {
    let subset = StridedDataset::new(InMemDataset::new((0..12).collect::<Vec<u32>>()), 5)?;
    assert_eq!(subset.len(), 3);
    assert_eq!(subset.iter().collect::<Vec<_>>(), [0, 5, 10]);
    assert_eq!(subset.get(3), None);

    let whole = StridedDataset::new(InMemDataset::new(vec![1u32, 2]), 1)?;
    assert_eq!(whole.len(), 2);
    assert!(StridedDataset::new(InMemDataset::new(vec![1u32]), 0).is_err());

    let empty = StridedDataset::new(InMemDataset::new(Vec::<u32>::new()), 5)?;
    assert!(empty.is_empty());      Ok(())
}

}
