pub mod batcher;
pub mod flowers;
pub mod mat;
pub mod synthetic;
pub mod transform;

use crate::config::{BenchConfig, DatasetKind};
use crate::error::BenchError;
use batcher::{ImageBatch, ImageBatcher};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use flowers::FlowersDataset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synthetic::SyntheticDataset;

/// A preprocessed image with its class.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ImageItem {
    /// Mean-subtracted pixel values, channels first.
    ///
    /// # Shape
    /// [3 * image_size * image_size]
    pub image: Vec<f32>,

    /// Zero-based class index.
    pub label: usize,
}

pub type ImageLoader<B> = Arc<dyn DataLoader<B, ImageBatch<B>>>;

/// Builds the shuffled, batched training reader selected by `config`.
pub fn train_loader<B: Backend>(
    config: &BenchConfig,
    image_size: usize,
    num_classes: usize,
    device: &B::Device,
) -> Result<ImageLoader<B>, BenchError> {
    let batcher = ImageBatcher::new(config.data_format, image_size);
    let builder = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .set_device(device.clone());
    let builder = if config.num_workers > 0 {
        builder.num_workers(config.num_workers)
    } else {
        builder
    };

    let loader = match config.dataset {
        DatasetKind::Flowers => {
            if image_size != transform::CROP_SIZE as usize {
                return Err(BenchError::Dataset(format!(
                    "flowers images are cropped to {}, the network expects {image_size}",
                    transform::CROP_SIZE
                )));
            }
            if num_classes != flowers::NUM_CLASSES {
                log::warn!(
                    "flowers has {} classes, the network predicts {num_classes}",
                    flowers::NUM_CLASSES
                );
            }
            let dataset = FlowersDataset::train(config.data_dir.as_deref(), config.seed)?;
            builder.build(dataset)
        }
        DatasetKind::Synthetic => builder.build(SyntheticDataset::new(
            synthetic::DEFAULT_LEN,
            image_size,
            num_classes,
            config.seed,
        )),
    };
    log::info!(
        "{} reader: {} items, batch size {}",
        config.dataset,
        loader.num_items(),
        config.batch_size
    );
    Ok(loader)
}
