//! Runs training steps of the network on a bound device.

use crate::backend::SelectDevice;
use crate::config::BenchConfig;
use crate::data::batcher::{FeedBatch, ImageBatch};
use crate::error::BenchError;
use crate::metric::count_correct;
use crate::model::{Vgg16, Vgg16Config};
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// A batch ready to be stepped on.
pub trait Feed {
    fn num_samples(&self) -> usize;
}

impl<B: Backend> Feed for FeedBatch<B> {
    fn num_samples(&self) -> usize {
        self.images.dims()[0]
    }
}

/// What the driver needs to know about a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Mean loss over the batch.
    pub loss: f64,
    /// Number of correctly classified samples.
    pub correct: usize,
}

/// Turns reader batches into feeds and trains on them.
pub trait Executor {
    type Batch;
    type Feed: Feed;

    /// Reinterprets a reader batch in the layout the network expects.
    fn reshape(&self, batch: Self::Batch) -> Result<Self::Feed, BenchError>;

    /// One forward, backward and parameter update.
    fn step(&mut self, feed: Self::Feed) -> Result<StepOutput, BenchError>;
}

/// Adam with the default moments and an epsilon of `1e-8`.
pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new().with_epsilon(1e-8)
}

pub type Vgg16Optimizer<AutoB> = OptimizerAdaptor<Adam, Vgg16<AutoB>, AutoB>;

/// Trains a [`Vgg16`] with Adam.
pub struct BurnExecutor<AutoB: AutodiffBackend> {
    model: Vgg16<AutoB>,
    optim: Vgg16Optimizer<AutoB>,
    learning_rate: f64,
    image_size: usize,
    device: AutoB::Device,
}

/// Binds the network and its optimizer to the configured device.
///
/// Fails if the compiled backend cannot drive that device.
pub fn bind<AutoB>(
    config: &BenchConfig,
    model_config: &Vgg16Config,
) -> Result<BurnExecutor<AutoB>, BenchError>
where
    AutoB: AutodiffBackend + SelectDevice,
{
    let device = AutoB::select_device(config.device)?;
    log::info!("binding {} on the {} backend", config.device, AutoB::NAME);

    AutoB::seed(config.seed);
    let model = model_config.init::<AutoB>(&device)?;
    log::debug!(
        "{} layers, {} parameters",
        model.layers.len(),
        model.num_params()
    );
    let optim = optimizer_config().init::<AutoB, Vgg16<AutoB>>();

    Ok(BurnExecutor {
        model,
        optim,
        learning_rate: config.learning_rate,
        image_size: model_config.image_size,
        device,
    })
}

impl<AutoB: AutodiffBackend> BurnExecutor<AutoB> {
    pub fn device(&self) -> &AutoB::Device {
        &self.device
    }

    pub fn model(&self) -> &Vgg16<AutoB> {
        &self.model
    }
}

impl<AutoB: AutodiffBackend> Executor for BurnExecutor<AutoB> {
    type Batch = ImageBatch<AutoB>;
    type Feed = FeedBatch<AutoB>;

    fn reshape(&self, batch: Self::Batch) -> Result<Self::Feed, BenchError> {
        batch.into_feed(self.image_size)
    }

    fn step(&mut self, feed: Self::Feed) -> Result<StepOutput, BenchError> {
        let FeedBatch { images, labels } = feed;
        let step = self.model.forward_classification(images, labels);

        let loss = step.loss.clone().into_scalar().elem::<f64>();
        let correct = count_correct(step.predictions, step.labels);

        let grads = step.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optim.step(self.learning_rate, self.model.clone(), grads);

        Ok(StepOutput { loss, correct })
    }
}
