use crate::data::ImageItem;
use crate::data::mat::MatFile;
use crate::data::transform::ImageTransform;
use crate::error::BenchError;
use burn_common::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tar::Archive;

// https://www.robots.ox.ac.uk/~vgg/data/flowers/102/
const URL: &str = "https://www.robots.ox.ac.uk/~vgg/data/flowers/102/";
const ARCHIVE: &str = "102flowers.tgz";
const LABELS: &str = "imagelabels.mat";
const SETID: &str = "setid.mat";

pub const NUM_CLASSES: usize = 102;

static DOWNLOAD_LOCK: Mutex<()> = Mutex::new(());

/// Split of the Oxford 102 Flowers dataset.
///
/// The official test split (6149 images) is much larger than the official
/// training split (1020 images), so the two are swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowersSplit {
    Train,
    Test,
    Valid,
}

impl FlowersSplit {
    /// Variable of `setid.mat` listing the split's image ids.
    pub fn set_id(&self) -> &'static str {
        match self {
            FlowersSplit::Train => "tstid",
            FlowersSplit::Test => "trnid",
            FlowersSplit::Valid => "valid",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
struct FlowersItemRaw {
    image_path: PathBuf,
    label: usize,
    index: usize,
}

struct PathToImage {
    transform: ImageTransform,
    /// Times each item was read, so every pass draws new crops.
    reads: Vec<AtomicU64>,
}

impl Mapper<FlowersItemRaw, ImageItem> for PathToImage {
    /// Decodes and preprocesses the image file of a raw item.
    fn map(&self, item: &FlowersItemRaw) -> ImageItem {
        let image = image::open(&item.image_path)
            .unwrap_or_else(|err| panic!("Failed to decode {:?}: {err}", item.image_path));
        let draw = self.reads[item.index].fetch_add(1, Ordering::Relaxed);
        ImageItem {
            image: self.transform.apply(&image, item.index, draw),
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<FlowersItemRaw>, PathToImage, FlowersItemRaw>;

/// The Oxford 102 Flowers dataset: 8189 images of flowers common in the United
/// Kingdom, in 102 categories of 40 to 258 images each.
///
/// Images are decoded lazily, when an item is fetched.
pub struct FlowersDataset {
    dataset: MappedDataset,
}

impl Dataset<ImageItem> for FlowersDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl FlowersDataset {
    /// Training split, with random crops and flips.
    pub fn train(cache_dir: Option<&Path>, seed: u64) -> Result<Self, BenchError> {
        Self::new(FlowersSplit::Train, cache_dir, ImageTransform::train(seed))
    }

    pub fn test(cache_dir: Option<&Path>) -> Result<Self, BenchError> {
        Self::new(FlowersSplit::Test, cache_dir, ImageTransform::eval())
    }

    pub fn valid(cache_dir: Option<&Path>) -> Result<Self, BenchError> {
        Self::new(FlowersSplit::Valid, cache_dir, ImageTransform::eval())
    }

    fn new(
        split: FlowersSplit,
        cache_dir: Option<&Path>,
        transform: ImageTransform,
    ) -> Result<Self, BenchError> {
        let root = Self::download(cache_dir)?;
        let items = Self::read_items(&root, split)?;
        log::info!("flowers {split:?} split: {} images", items.len());

        let reads = items.iter().map(|_| AtomicU64::new(0)).collect();
        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, PathToImage { transform, reads });
        Ok(Self { dataset })
    }

    fn read_items(root: &Path, split: FlowersSplit) -> Result<Vec<FlowersItemRaw>, BenchError> {
        let labels = MatFile::open(root.join(LABELS))?;
        let labels = labels.vector("labels")?;
        let set_ids = MatFile::open(root.join(SETID))?;
        let set_ids = set_ids.vector(split.set_id())?;
        let images_dir = root.join("jpg");

        set_ids
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                // image ids and labels are both 1-based
                let id = id as usize;
                let label = id
                    .checked_sub(1)
                    .and_then(|i| labels.get(i))
                    .ok_or_else(|| BenchError::Dataset(format!("image id {id} has no label")))?;
                let label = *label as usize;
                if !(1..=NUM_CLASSES).contains(&label) {
                    return Err(BenchError::Dataset(format!(
                        "image id {id} has label {label}, expected 1..={NUM_CLASSES}"
                    )));
                }
                Ok(FlowersItemRaw {
                    image_path: images_dir.join(format!("image_{id:05}.jpg")),
                    label: label - 1,
                    index,
                })
            })
            .collect()
    }

    /// Downloads the archive and the label files, extracting the archive once.
    fn download(cache_dir: Option<&Path>) -> Result<PathBuf, BenchError> {
        let _lock = DOWNLOAD_LOCK
            .lock()
            .map_err(|_| BenchError::Dataset("download lock poisoned".to_string()))?;

        let cache_dir = match cache_dir {
            Some(dir) => dir.to_path_buf(),
            // Dataset files are stored in the burn-dataset cache directory
            None => dirs::home_dir()
                .ok_or_else(|| BenchError::Dataset("could not get home directory".to_string()))?
                .join(".cache")
                .join("burn-dataset"),
        };
        let root = cache_dir.join("flowers");
        create_dir_all(&root)?;

        Self::download_file(LABELS, &root)?;
        Self::download_file(SETID, &root)?;

        let images_dir = root.join("jpg");
        if !images_dir.exists() {
            log::info!("downloading {URL}{ARCHIVE} into {root:?}");
            let bytes = download_file_as_bytes(&format!("{URL}{ARCHIVE}"), ARCHIVE);
            let mut archive = Archive::new(GzDecoder::new(&bytes[..]));
            archive.unpack(&root)?;
        }

        Ok(root)
    }

    fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf, BenchError> {
        let file_name = dest_dir.join(name);
        if !file_name.exists() {
            log::info!("downloading {URL}{name}");
            let bytes = download_file_as_bytes(&format!("{URL}{name}"), name);
            let mut output_file = File::create(&file_name)?;
            std::io::copy(&mut &bytes[..], &mut output_file)?;
        }
        Ok(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mat::tests::double_vectors;
    use image::{Rgb, RgbImage};
    use temp_dir::TempDir;

    fn write_label_files(dir: &Path, labels: &[f64], tstid: &[f64]) {
        std::fs::write(dir.join(LABELS), double_vectors(&[("labels", labels)])).unwrap();
        let trnid: &[f64] = &[1.0];
        let valid: &[f64] = &[4.0];
        let set_ids = double_vectors(&[("trnid", trnid), ("tstid", tstid), ("valid", valid)]);
        std::fs::write(dir.join(SETID), set_ids).unwrap();
    }

    #[test]
    fn items_use_zero_based_labels() {
        let dir = TempDir::with_prefix("flowers-").unwrap();
        write_label_files(dir.path(), &[5.0, 102.0, 1.0, 7.0], &[3.0, 2.0]);

        let items = FlowersDataset::read_items(dir.path(), FlowersSplit::Train).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 0);
        assert_eq!(items[0].index, 0);
        assert_eq!(
            items[0].image_path,
            dir.path().join("jpg").join("image_00003.jpg")
        );
        assert_eq!(items[1].label, 101);
        assert_eq!(items[1].index, 1);

        let valid = FlowersDataset::read_items(dir.path(), FlowersSplit::Valid).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].label, 6);
    }

    #[test]
    fn ids_without_labels_are_rejected() {
        let dir = TempDir::with_prefix("flowers-").unwrap();
        write_label_files(dir.path(), &[5.0, 102.0], &[3.0]);
        let err = FlowersDataset::read_items(dir.path(), FlowersSplit::Train).unwrap_err();
        assert!(matches!(err, BenchError::Dataset(_)));
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        let dir = TempDir::with_prefix("flowers-").unwrap();
        write_label_files(dir.path(), &[0.0, 103.0], &[1.0]);
        assert!(FlowersDataset::read_items(dir.path(), FlowersSplit::Train).is_err());
    }

    /// A cache directory holding the label files and the images of ids 1 to 4,
    /// so nothing is downloaded.
    fn cached_flowers() -> TempDir {
        let dir = TempDir::with_prefix("flowers-").unwrap();
        let root = dir.path().join("flowers");
        let images = root.join("jpg");
        std::fs::create_dir_all(&images).unwrap();
        write_label_files(&root, &[5.0, 102.0, 1.0, 7.0], &[3.0, 2.0]);
        for id in 1..=4u32 {
            let image = RgbImage::from_fn(300, 260, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, (id * 40) as u8])
            });
            image
                .save(images.join(format!("image_{id:05}.jpg")))
                .unwrap();
        }
        dir
    }

    #[test]
    fn every_split_loads_from_the_cache() {
        let dir = cached_flowers();
        let train = FlowersDataset::train(Some(dir.path()), 0).unwrap();
        let test = FlowersDataset::test(Some(dir.path())).unwrap();
        let valid = FlowersDataset::valid(Some(dir.path())).unwrap();
        assert_eq!((train.len(), test.len(), valid.len()), (2, 1, 1));

        let item = test.get(0).unwrap();
        assert_eq!(item.image.len(), 3 * 224 * 224);
        assert_eq!(item.label, 4);
        assert_eq!(valid.get(0).unwrap().label, 6);
    }

    #[test]
    fn evaluation_splits_are_not_augmented() {
        let dir = cached_flowers();
        let valid = FlowersDataset::valid(Some(dir.path())).unwrap();
        assert_eq!(valid.get(0).unwrap().image, valid.get(0).unwrap().image);
    }

    #[test]
    fn each_pass_draws_new_training_crops() {
        let dir = cached_flowers();
        let train = FlowersDataset::train(Some(dir.path()), 0).unwrap();
        let first = train.get(1).unwrap();
        let differs = (0..3).any(|_| train.get(1).unwrap().image != first.image);
        assert!(differs);

        // same seed, same sequence of reads
        let again = FlowersDataset::train(Some(dir.path()), 0).unwrap();
        assert_eq!(again.get(1).unwrap().image, first.image);
    }

    #[test]
    fn train_and_test_splits_are_swapped() {
        assert_eq!(FlowersSplit::Train.set_id(), "tstid");
        assert_eq!(FlowersSplit::Test.set_id(), "trnid");
        assert_eq!(FlowersSplit::Valid.set_id(), "valid");
    }

    #[test]
    #[ignore = "downloads the Oxford 102 Flowers dataset (330MB)"]
    fn train_split_has_6149_images() {
        let dataset = FlowersDataset::train(None, 0).unwrap();
        assert_eq!(dataset.len(), 6149);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.len(), 3 * 224 * 224);
        assert!(item.label < NUM_CLASSES);
    }
}
