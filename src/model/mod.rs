pub mod topology;

use crate::error::BenchError;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
    conv::{Conv2d, Conv2dConfig},
    loss::CrossEntropyLossConfig,
    pool::{MaxPool2d, MaxPool2dConfig},
};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use topology::{LayerSpec, LossSpec, Topology};

#[derive(Config, Debug)]
pub struct Vgg16Config {
    #[config(default = 3)]
    pub in_channels: usize,
    /// Side of the square input images, a multiple of 32.
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 102)]
    pub num_classes: usize,
}

impl Vgg16Config {
    pub fn topology(&self) -> Result<Topology, BenchError> {
        Topology::vgg16_bn_drop(self.in_channels, self.image_size, self.num_classes)
    }

    /// Initializes the network with freshly sampled parameters.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg16<B>, BenchError> {
        Ok(Vgg16::from_topology(self.topology()?, device))
    }
}

/// Reshapes `[N, C, H, W]` into `[N, C * H * W]`.
#[derive(Module, Clone, Debug, Default)]
pub struct Flatten;

/// Softmax over the last dimension.
#[derive(Module, Clone, Debug, Default)]
pub struct Softmax;

#[derive(Module, Debug)]
pub enum Layer<B: Backend> {
    Conv2d(Conv2d<B>),
    /// Batch norm of `[N, C, H, W]` inputs.
    SpatialNorm(BatchNorm<B, 2>),
    /// Batch norm of `[N, C]` inputs.
    Norm(BatchNorm<B, 0>),
    Relu(Relu),
    Dropout(Dropout),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
    Linear(Linear<B>),
    Softmax(Softmax),
}

/// Intermediate value flowing through the layers.
#[derive(Debug, Clone)]
pub enum Activation<B: Backend> {
    /// # Shape
    /// [batch_size, channels, height, width]
    Spatial(Tensor<B, 4>),
    /// # Shape
    /// [batch_size, features]
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Layer<B> {
    pub fn init(spec: LayerSpec, device: &B::Device) -> Self {
        match spec {
            LayerSpec::Conv2d {
                channels,
                kernel_size,
                padding,
            } => Layer::Conv2d(
                Conv2dConfig::new(channels, [kernel_size, kernel_size])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .init(device),
            ),
            LayerSpec::BatchNorm {
                num_features,
                spatial: true,
            } => Layer::SpatialNorm(BatchNormConfig::new(num_features).init(device)),
            LayerSpec::BatchNorm {
                num_features,
                spatial: false,
            } => Layer::Norm(BatchNormConfig::new(num_features).init(device)),
            LayerSpec::Relu => Layer::Relu(Relu::new()),
            LayerSpec::Dropout { prob } => Layer::Dropout(DropoutConfig::new(prob).init()),
            LayerSpec::MaxPool2d { size, stride } => Layer::MaxPool2d(
                MaxPool2dConfig::new([size, size])
                    .with_strides([stride, stride])
                    .init(),
            ),
            LayerSpec::Flatten => Layer::Flatten(Flatten),
            LayerSpec::Linear { d_input, d_output } => {
                Layer::Linear(LinearConfig::new(d_input, d_output).init(device))
            }
            LayerSpec::Softmax => Layer::Softmax(Softmax),
        }
    }

    /// # Panics
    /// If the activation rank does not fit the layer, which a [`Topology`]
    /// built by [`Topology::vgg16_bn_drop`] never produces.
    pub fn forward(&self, x: Activation<B>) -> Activation<B> {
        use Activation::{Flat, Spatial};
        match (self, x) {
            (Layer::Conv2d(conv), Spatial(x)) => Spatial(conv.forward(x)),
            (Layer::SpatialNorm(norm), Spatial(x)) => Spatial(norm.forward(x)),
            (Layer::Norm(norm), Flat(x)) => Flat(norm.forward(x)),
            (Layer::Relu(relu), Spatial(x)) => Spatial(relu.forward(x)),
            (Layer::Relu(relu), Flat(x)) => Flat(relu.forward(x)),
            (Layer::Dropout(dropout), Spatial(x)) => Spatial(dropout.forward(x)),
            (Layer::Dropout(dropout), Flat(x)) => Flat(dropout.forward(x)),
            (Layer::MaxPool2d(pool), Spatial(x)) => Spatial(pool.forward(x)),
            (Layer::Flatten(_), Spatial(x)) => Flat(x.flatten(1, 3)),
            (Layer::Linear(linear), Flat(x)) => Flat(linear.forward(x)),
            (Layer::Softmax(_), Flat(x)) => Flat(softmax(x, 1)),
            (layer, x) => panic!(
                "layer {} cannot take a {} activation",
                layer.name(),
                match x {
                    Spatial(_) => "4D",
                    Flat(_) => "2D",
                }
            ),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::SpatialNorm(_) => "spatial batch norm",
            Layer::Norm(_) => "batch norm",
            Layer::Relu(_) => "relu",
            Layer::Dropout(_) => "dropout",
            Layer::MaxPool2d(_) => "max pool",
            Layer::Flatten(_) => "flatten",
            Layer::Linear(_) => "linear",
            Layer::Softmax(_) => "softmax",
        }
    }
}

/// VGG16 with batch normalization and dropout, ending in a softmax.
#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    pub layers: Vec<Layer<B>>,
}

/// Output of a training step's forward pass.
#[derive(Debug, Clone)]
pub struct ClassificationStep<B: Backend> {
    /// Mean cross-entropy over the batch.
    ///
    /// # Shape
    /// [1]
    pub loss: Tensor<B, 1>,
    /// # Shape
    /// [batch_size, num_classes]
    pub predictions: Tensor<B, 2>,
    /// # Shape
    /// [batch_size, 1]
    pub labels: Tensor<B, 2, Int>,
}

impl<B: Backend> Vgg16<B> {
    pub fn from_topology(topology: Topology, device: &B::Device) -> Self {
        let Topology {
            layers,
            loss: LossSpec::CrossEntropyMean,
        } = topology;
        let layers = layers
            .into_iter()
            .map(|spec| Layer::init(spec, device))
            .collect();
        Self { layers }
    }

    /// # Shape
    /// - Input: [batch_size, channels, image_size, image_size]
    /// - Output: [batch_size, num_classes], class probabilities.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = self
            .layers
            .iter()
            .fold(Activation::Spatial(images), |x, layer| layer.forward(x));
        match output {
            Activation::Flat(predictions) => predictions,
            Activation::Spatial(x) => panic!("network ended on a 4D activation {:?}", x.dims()),
        }
    }

    /// `labels` has shape [batch_size, 1].
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 2, Int>,
    ) -> ClassificationStep<B> {
        let [batch_size, _] = labels.dims();
        let predictions = self.forward(images);
        let targets = labels.clone().reshape([batch_size]);

        let loss = CrossEntropyLossConfig::new()
            .with_logits(false)
            .init(&predictions.device())
            .forward(predictions.clone(), targets);

        ClassificationStep {
            loss,
            predictions,
            labels,
        }
    }
}
