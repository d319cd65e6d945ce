//! The pass and batch loop of the benchmark.

use crate::backend::SelectDevice;
use crate::config::BenchConfig;
use crate::data::train_loader;
use crate::error::BenchError;
use crate::executor::{Executor, Feed, StepOutput, bind};
use crate::metric::AccuracyTracker;
use crate::model::Vgg16Config;
use burn::data::dataloader::DataLoader;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

/// Source of batches, traversed once per pass.
pub trait BatchReader {
    type Batch;

    /// A fresh traversal; the end of the iterator ends the pass.
    fn batches(&self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

impl<B: Backend, O: 'static> BatchReader for Arc<dyn DataLoader<B, O>> {
    type Batch = O;

    fn batches(&self) -> Box<dyn Iterator<Item = O> + '_> {
        Box::new(self.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub pass: usize,
    pub batches: usize,
    pub accuracy: f64,
    /// Seconds.
    pub elapsed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Steps over all passes.
    pub steps: usize,
    /// Samples of the batches after the warm-up ones.
    pub samples: usize,
    pub passes: Vec<PassReport>,
    /// Seconds since the first timed batch, 0 if no batch was timed.
    pub duration: f64,
    /// Samples per second, 0 if nothing was timed.
    pub throughput: f64,
}

pub struct Driver<'a, R, E> {
    config: &'a BenchConfig,
    reader: R,
    executor: E,
}

impl<'a, R, E> Driver<'a, R, E>
where
    E: Executor,
    R: BatchReader<Batch = E::Batch>,
{
    pub fn new(config: &'a BenchConfig, reader: R, executor: E) -> Self {
        Self {
            config,
            reader,
            executor,
        }
    }

    /// Trains for the configured passes, stopping early at the iteration cap,
    /// and writes the per-batch, per-pass and final lines to `out`.
    pub fn run(mut self, out: &mut impl Write) -> Result<RunSummary, BenchError> {
        let iterations = self.config.iterations;
        let num_skip_batch = self.config.num_skip_batch;

        let mut iters = 0;
        let mut num_samples = 0;
        let mut start_time: Option<Instant> = None;
        let mut passes = vec![];

        for pass in 0..self.config.num_passes {
            if iters == iterations {
                break;
            }
            let mut accuracy = AccuracyTracker::reset();
            let pass_start = Instant::now();
            let mut batches = 0;
            let mut capped = false;

            for (batch_id, batch) in self.reader.batches().enumerate() {
                let step_start = Instant::now();
                let feed = self.executor.reshape(batch)?;
                if iters == num_skip_batch {
                    start_time = Some(Instant::now());
                }
                let batch_size = feed.num_samples();

                let StepOutput { loss, correct } = self.executor.step(feed)?;
                let acc = accuracy.update(correct, batch_size);
                let step_time = step_start.elapsed().as_secs_f64();
                writeln!(
                    out,
                    "pass={pass}, batch={batch_id}, loss={loss:.6}, acc={acc:.6}, time={step_time:.6}"
                )?;

                batches += 1;
                iters += 1;
                if iters > num_skip_batch {
                    num_samples += batch_size;
                }
                if iters == iterations {
                    capped = true;
                    break;
                }
            }

            let pass_acc = accuracy.finalize();
            let elapsed = pass_start.elapsed().as_secs_f64();
            writeln!(
                out,
                "pass {pass}, training_acc={pass_acc:.6}, elapsed_time={elapsed:.6}s\n"
            )?;
            passes.push(PassReport {
                pass,
                batches,
                accuracy: pass_acc,
                elapsed,
            });
            if capped {
                log::debug!("iteration cap {iterations} reached in pass {pass}");
                break;
            }
        }

        let duration = start_time.map_or(0.0, |start| start.elapsed().as_secs_f64());
        let throughput = if num_samples == 0 || duration <= 0.0 {
            0.0
        } else {
            num_samples as f64 / duration
        };
        writeln!(
            out,
            "duration={duration:.6}s, performance={throughput:.6}imgs/s"
        )?;

        Ok(RunSummary {
            steps: iters,
            samples: num_samples,
            passes,
            duration,
            throughput,
        })
    }
}

/// Builds the network, binds it to the configured device, and trains it on
/// the configured dataset.
pub fn train<AutoB>(config: &BenchConfig, out: &mut impl Write) -> Result<RunSummary, BenchError>
where
    AutoB: AutodiffBackend + SelectDevice,
{
    let model_config = Vgg16Config::new();
    let executor = bind::<AutoB>(config, &model_config)?;
    let reader = train_loader::<AutoB>(
        config,
        model_config.image_size,
        model_config.num_classes,
        executor.device(),
    )?;

    log::info!(
        "training for {} passes, at most {} iterations",
        config.num_passes,
        config.iterations
    );
    Driver::new(config, reader, executor).run(out)
}
