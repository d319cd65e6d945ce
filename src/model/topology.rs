//! Typed description of the network, independent of any backend.

use crate::error::BenchError;

/// Filter count and per-stage dropout rate of each convolution group.
///
/// A group has one convolution stage per dropout rate; a rate of 0 omits the
/// stage's dropout.
pub const VGG16_GROUPS: [(usize, &[f64]); 5] = [
    (64, &[0.3, 0.0]),
    (128, &[0.4, 0.0]),
    (256, &[0.4, 0.4, 0.0]),
    (512, &[0.4, 0.4, 0.0]),
    (512, &[0.4, 0.4, 0.0]),
];

/// Total downsampling of the five pooling layers.
pub const DOWNSAMPLING: usize = 32;

pub const HIDDEN_SIZE: usize = 512;
pub const HEAD_DROPOUT: f64 = 0.5;
/// Width of the last hidden fully-connected layer, before the classifier.
pub const PRE_CLASSIFIER_SIZE: usize = 102;

#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    /// 3x3 convolution, stride 1, no activation.
    Conv2d {
        channels: [usize; 2],
        kernel_size: usize,
        padding: usize,
    },
    /// Normalizes over channels; `spatial` for `[N, C, H, W]` inputs, `[N, C]` otherwise.
    BatchNorm { num_features: usize, spatial: bool },
    Relu,
    Dropout { prob: f64 },
    MaxPool2d { size: usize, stride: usize },
    /// `[N, C, H, W]` to `[N, C * H * W]`.
    Flatten,
    Linear { d_input: usize, d_output: usize },
    /// Over the class dimension.
    Softmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossSpec {
    /// Cross-entropy of probabilities against class labels, averaged over the batch.
    CrossEntropyMean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub layers: Vec<LayerSpec>,
    pub loss: LossSpec,
}

impl Topology {
    /// VGG16 with batch normalization after every convolution and dropout.
    pub fn vgg16_bn_drop(
        in_channels: usize,
        image_size: usize,
        num_classes: usize,
    ) -> Result<Self, BenchError> {
        if image_size == 0 || image_size % DOWNSAMPLING != 0 {
            return Err(BenchError::Shape(format!(
                "image size {image_size} is not a positive multiple of {DOWNSAMPLING}"
            )));
        }
        if in_channels == 0 || num_classes == 0 {
            return Err(BenchError::Shape(
                "the network needs at least one input channel and one class".to_string(),
            ));
        }

        let mut layers = vec![];
        let mut channels = in_channels;
        for (filters, dropouts) in VGG16_GROUPS {
            for &prob in dropouts {
                layers.push(LayerSpec::Conv2d {
                    channels: [channels, filters],
                    kernel_size: 3,
                    padding: 1,
                });
                layers.push(LayerSpec::BatchNorm {
                    num_features: filters,
                    spatial: true,
                });
                layers.push(LayerSpec::Relu);
                if prob > 0.0 {
                    layers.push(LayerSpec::Dropout { prob });
                }
                channels = filters;
            }
            layers.push(LayerSpec::MaxPool2d { size: 2, stride: 2 });
        }

        let side = image_size / DOWNSAMPLING;
        layers.extend([
            LayerSpec::Flatten,
            LayerSpec::Dropout { prob: HEAD_DROPOUT },
            LayerSpec::Linear {
                d_input: channels * side * side,
                d_output: HIDDEN_SIZE,
            },
            LayerSpec::BatchNorm {
                num_features: HIDDEN_SIZE,
                spatial: false,
            },
            LayerSpec::Relu,
            LayerSpec::Dropout { prob: HEAD_DROPOUT },
            LayerSpec::Linear {
                d_input: HIDDEN_SIZE,
                d_output: PRE_CLASSIFIER_SIZE,
            },
            LayerSpec::Linear {
                d_input: PRE_CLASSIFIER_SIZE,
                d_output: num_classes,
            },
            LayerSpec::Softmax,
        ]);

        Ok(Self {
            layers,
            loss: LossSpec::CrossEntropyMean,
        })
    }

    /// Output channels of every convolution, in order.
    pub fn conv_filters(&self) -> Vec<usize> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                LayerSpec::Conv2d { channels, .. } => Some(channels[1]),
                _ => None,
            })
            .collect()
    }

    pub fn dropout_probs(&self) -> Vec<f64> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                LayerSpec::Dropout { prob } => Some(*prob),
                _ => None,
            })
            .collect()
    }
}
