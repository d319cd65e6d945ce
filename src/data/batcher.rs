use crate::config::DataFormat;
use crate::data::ImageItem;
use crate::error::BenchError;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    format: DataFormat,
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(format: DataFormat, image_size: usize) -> Self {
        Self { format, image_size }
    }
}

/// A batch as produced by the reader, in the configured layout.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// # Shape
    /// [batch_size, 3, height, width] for NCHW,
    /// [batch_size, height, width, 3] for NHWC.
    pub images: Tensor<B, 4>,
    pub format: DataFormat,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// A batch in the layout the network consumes.
#[derive(Clone, Debug)]
pub struct FeedBatch<B: Backend> {
    /// # Shape
    /// [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size, 1]
    pub labels: Tensor<B, 2, Int>,
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let size = self.image_size;
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label as i64))
            .unzip();
        let batch_size = items_label.len();

        let images = items_image
            .into_iter()
            .map(|image| TensorData::new(image, [3, size, size]).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 3>::from_data(data, device))
            .collect();
        let images = Tensor::stack(images, 0);
        let images = match self.format {
            DataFormat::Nchw => images,
            DataFormat::Nhwc => images.permute([0, 2, 3, 1]),
        };

        let targets = TensorData::new(items_label, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::from_data(targets, device);

        ImageBatch {
            images,
            format: self.format,
            targets,
        }
    }
}

impl<B: Backend> ImageBatch<B> {
    pub fn num_samples(&self) -> usize {
        self.images.dims()[0]
    }

    /// Reinterprets the batch as `[N, 3, image_size, image_size]` images and
    /// `[N, 1]` labels.
    pub fn into_feed(self, image_size: usize) -> Result<FeedBatch<B>, BenchError> {
        let images = match self.format {
            DataFormat::Nchw => self.images,
            DataFormat::Nhwc => self.images.permute([0, 3, 1, 2]),
        };
        let [batch_size, channels, height, width] = images.dims();
        if [channels, height, width] != [3, image_size, image_size] {
            return Err(BenchError::Shape(format!(
                "expected {} images of 3x{image_size}x{image_size}, got {channels}x{height}x{width}",
                self.format
            )));
        }
        let [num_labels] = self.targets.dims();
        if num_labels != batch_size {
            return Err(BenchError::Shape(format!(
                "{batch_size} images but {num_labels} labels"
            )));
        }

        Ok(FeedBatch {
            images,
            labels: self.targets.reshape([batch_size, 1]),
        })
    }
}
