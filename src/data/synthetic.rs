use crate::data::ImageItem;
use crate::data::transform::{MEAN_RGB, item_rng};
use burn_dataset::Dataset;
use rand::Rng;

/// Same length as the flowers training split.
pub const DEFAULT_LEN: usize = 6149;

/// Random images with random labels, generated on access.
///
/// An item only depends on the seed and its index, so repeated reads and
/// different passes see the same data.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    len: usize,
    image_size: usize,
    num_classes: usize,
    seed: u64,
}

impl SyntheticDataset {
    pub fn new(len: usize, image_size: usize, num_classes: usize, seed: u64) -> Self {
        assert!(num_classes > 0, "at least one class is required");
        Self {
            len,
            image_size,
            num_classes,
            seed,
        }
    }
}

impl Dataset<ImageItem> for SyntheticDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        if index >= self.len {
            return None;
        }
        let mut rng = item_rng(self.seed, index, 0);
        let label = rng.random_range(0..self.num_classes);
        let plane = self.image_size * self.image_size;
        let image = MEAN_RGB
            .iter()
            .flat_map(|mean| {
                (0..plane)
                    .map(|_| rng.random::<u8>() as f32 - mean)
                    .collect::<Vec<_>>()
            })
            .collect();
        Some(ImageItem { image, label })
    }

    fn len(&self) -> usize {
        self.len
    }
}
