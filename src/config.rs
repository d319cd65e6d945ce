use crate::error::ConfigError;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

pub const HELP: &str = "\
VGG16 Benchmark

Trains a VGG16 network (with batch normalization and dropout) for a bounded number
of batches and reports per-batch loss/accuracy, per-pass accuracy and the overall
throughput in images per second.

USAGE:
    vgg16-bench [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    --batch_size <INT>          Batch size for training [default: 32]
    --learning_rate <FLOAT>     Learning rate for training [default: 0.001]
    --num_passes <INT>          Number of passes over the dataset [default: 10]
    --device <CPU|GPU>          The device type [default: CPU]
    --data_format <NCHW|NHWC>   Layout of the images produced by the reader [default: NHWC]
    --num_skip_batch <INT>      The first #num_skip_batch batches are skipped for timing [default: 0]
    --iterations <INT>          Maximum number of batches over all passes [default: 10]
    --dataset <flowers|synthetic>
                                Training images source [default: flowers]
    --data_dir <PATH>           Dataset cache directory [default: ~/.cache/burn-dataset]
    --seed <INT>                Seed for parameter init, shuffling and augmentation [default: 0]
    --num_workers <INT>         Number of dataloader workers [default: 2]

Log verbosity is controlled with RUST_LOG (e.g. RUST_LOG=debug).
";

const BANNER_BEGIN: &str = "-----------  Configuration Arguments -----------";
const BANNER_END: &str = "------------------------------------------------";

/// Device on which the executor is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Channel ordering of the image tensors produced by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Nchw,
    Nhwc,
}

/// Source of the training images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Oxford 102 Flowers, downloaded on first use.
    Flowers,
    /// Deterministic random images, nothing to download.
    Synthetic,
}

macro_rules! choice {
    ($ty:ty, $($variant:path => $name:literal),+ $(,)?) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                f.write_str(name)
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    _ => Err(format!(
                        "invalid choice {s:?} (choose from {})",
                        [$($name),+].join(", ")
                    )),
                }
            }
        }
    };
}

choice!(DeviceKind, DeviceKind::Cpu => "CPU", DeviceKind::Gpu => "GPU");
choice!(DataFormat, DataFormat::Nchw => "NCHW", DataFormat::Nhwc => "NHWC");
choice!(
    DatasetKind,
    DatasetKind::Flowers => "flowers",
    DatasetKind::Synthetic => "synthetic",
);

/// Resolved benchmark options.
///
/// Built once at start-up and passed by reference to every component.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_passes: usize,
    pub device: DeviceKind,
    pub data_format: DataFormat,
    /// Batches before this global index are excluded from the throughput timing.
    pub num_skip_batch: usize,
    /// Cap on the number of batches over all passes.
    pub iterations: usize,
    pub dataset: DatasetKind,
    pub data_dir: Option<PathBuf>,
    pub seed: u64,
    pub num_workers: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 1e-3,
            num_passes: 10,
            device: DeviceKind::Cpu,
            data_format: DataFormat::Nhwc,
            num_skip_batch: 0,
            iterations: 10,
            dataset: DatasetKind::Flowers,
            data_dir: None,
            seed: 0,
            num_workers: 2,
        }
    }
}

impl BenchConfig {
    /// Parses the process arguments.
    ///
    /// Returns `None` when help was requested.
    pub fn parse() -> Result<Option<Self>, ConfigError> {
        Self::parse_args(pico_args::Arguments::from_env())
    }

    /// Parses an explicit argument list, without the program name.
    pub fn parse_from<I, S>(args: I) -> Result<Option<Self>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args = args.into_iter().map(Into::into).collect();
        Self::parse_args(pico_args::Arguments::from_vec(args))
    }

    fn parse_args(mut pargs: pico_args::Arguments) -> Result<Option<Self>, ConfigError> {
        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let defaults = Self::default();
        let config = Self {
            batch_size: pargs
                .opt_value_from_str("--batch_size")?
                .unwrap_or(defaults.batch_size),
            learning_rate: pargs
                .opt_value_from_str("--learning_rate")?
                .unwrap_or(defaults.learning_rate),
            num_passes: pargs
                .opt_value_from_str("--num_passes")?
                .unwrap_or(defaults.num_passes),
            device: pargs
                .opt_value_from_str("--device")?
                .unwrap_or(defaults.device),
            data_format: pargs
                .opt_value_from_str("--data_format")?
                .unwrap_or(defaults.data_format),
            num_skip_batch: pargs
                .opt_value_from_str("--num_skip_batch")?
                .unwrap_or(defaults.num_skip_batch),
            iterations: pargs
                .opt_value_from_str("--iterations")?
                .unwrap_or(defaults.iterations),
            dataset: pargs
                .opt_value_from_str("--dataset")?
                .unwrap_or(defaults.dataset),
            data_dir: pargs.opt_value_from_os_str("--data_dir", parse_path)?,
            seed: pargs.opt_value_from_str("--seed")?.unwrap_or(defaults.seed),
            num_workers: pargs
                .opt_value_from_str("--num_workers")?
                .unwrap_or(defaults.num_workers),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(ConfigError::Unused(remaining));
        }

        config.validate()?;
        Ok(Some(config))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange {
                option: "--batch_size",
                reason: "must be positive",
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::OutOfRange {
                option: "--learning_rate",
                reason: "must be a positive finite number",
            });
        }
        Ok(())
    }

    /// Every set option as `(name, value)`, sorted by name.
    ///
    /// `data_dir` is left out when unset, so that every value parses back.
    pub fn arguments(&self) -> Vec<(&'static str, String)> {
        let mut args = vec![
            ("batch_size", self.batch_size.to_string()),
            ("data_format", self.data_format.to_string()),
            ("dataset", self.dataset.to_string()),
            ("device", self.device.to_string()),
            ("iterations", self.iterations.to_string()),
            ("learning_rate", self.learning_rate.to_string()),
            ("num_passes", self.num_passes.to_string()),
            ("num_skip_batch", self.num_skip_batch.to_string()),
            ("num_workers", self.num_workers.to_string()),
            ("seed", self.seed.to_string()),
        ];
        if let Some(path) = &self.data_dir {
            args.push(("data_dir", path.display().to_string()));
        }
        args.sort_by_key(|(name, _)| *name);
        args
    }

    /// Writes the configuration banner.
    pub fn print_arguments(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "{BANNER_BEGIN}")?;
        for (name, value) in self.arguments() {
            writeln!(out, "{name}: {value}")?;
        }
        writeln!(out, "{BANNER_END}")
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<BenchConfig>, ConfigError> {
        BenchConfig::parse_from(args.iter().copied())
    }

    #[test]
    fn defaults_when_no_arguments() {
        let config = parse(&[]).unwrap().unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.num_passes, 10);
        assert_eq!(config.device, DeviceKind::Cpu);
        assert_eq!(config.data_format, DataFormat::Nhwc);
        assert_eq!(config.num_skip_batch, 0);
        assert_eq!(config.iterations, 10);
    }

    #[test]
    fn parses_every_option() {
        let config = parse(&[
            "--batch_size",
            "8",
            "--learning_rate",
            "0.01",
            "--num_passes",
            "3",
            "--device",
            "GPU",
            "--data_format",
            "NCHW",
            "--num_skip_batch",
            "2",
            "--iterations",
            "5",
            "--dataset",
            "synthetic",
            "--data_dir",
            "/tmp/flowers",
            "--seed",
            "7",
            "--num_workers",
            "0",
        ])
        .unwrap()
        .unwrap();

        assert_eq!(
            config,
            BenchConfig {
                batch_size: 8,
                learning_rate: 0.01,
                num_passes: 3,
                device: DeviceKind::Gpu,
                data_format: DataFormat::Nchw,
                num_skip_batch: 2,
                iterations: 5,
                dataset: DatasetKind::Synthetic,
                data_dir: Some(PathBuf::from("/tmp/flowers")),
                seed: 7,
                num_workers: 0,
            }
        );
    }

    #[test]
    fn equals_sign_form_is_accepted() {
        let config = parse(&["--batch_size=16", "--device=GPU"]).unwrap().unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.device, DeviceKind::Gpu);
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse(&["--help"]).unwrap().is_none());
        assert!(parse(&["-h", "--batch_size", "nope"]).unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(parse(&["--batch_size", "abc"]).is_err());
        assert!(parse(&["--batch_size", "-1"]).is_err());
        assert!(parse(&["--learning_rate", "fast"]).is_err());
        assert!(parse(&["--iterations", "1.5"]).is_err());
    }

    #[test]
    fn rejects_missing_values() {
        let err = parse(&["--batch_size"]).unwrap_err();
        assert!(matches!(err, ConfigError::Args(_)), "{err:?}");
    }

    #[test]
    fn rejects_unknown_choices() {
        assert!(parse(&["--device", "TPU"]).is_err());
        assert!(parse(&["--device", "cpu"]).is_err());
        assert!(parse(&["--data_format", "CHW"]).is_err());
        assert!(parse(&["--dataset", "cifar"]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = parse(&["--batch_size", "0"]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                option: "--batch_size",
                ..
            }
        ));
        assert!(parse(&["--learning_rate", "0"]).is_err());
        assert!(parse(&["--learning_rate", "-0.1"]).is_err());
        assert!(parse(&["--learning_rate", "inf"]).is_err());
    }

    #[test]
    fn rejects_unknown_arguments() {
        let err = parse(&["--batch_size", "4", "--epochs", "3"]).unwrap_err();
        assert!(matches!(err, ConfigError::Unused(_)));
    }

    #[test]
    fn gpu_is_accepted_at_parse_time() {
        let config = parse(&["--device", "GPU"]).unwrap().unwrap();
        assert_eq!(config.device, DeviceKind::Gpu);
    }

    #[test]
    fn banner_is_sorted_and_bracketed() {
        let config = BenchConfig::default();
        let mut out = Vec::new();
        config.print_arguments(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.first(), Some(&BANNER_BEGIN));
        assert_eq!(lines.last(), Some(&BANNER_END));
        let names: Vec<&str> = lines[1..lines.len() - 1]
            .iter()
            .map(|line| line.split(": ").next().unwrap())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(lines.contains(&"learning_rate: 0.001"));
        assert!(lines.contains(&"data_format: NHWC"));
        assert!(!text.contains("data_dir"));
    }

    fn reparse(config: &BenchConfig) -> BenchConfig {
        let mut args = Vec::new();
        for (name, value) in config.arguments() {
            args.push(format!("--{name}"));
            args.push(value);
        }
        BenchConfig::parse_from(args).unwrap().unwrap()
    }

    #[test]
    fn default_values_round_trip() {
        let config = BenchConfig::default();
        assert_eq!(reparse(&config), config);
        assert_eq!(reparse(&config).data_dir, None);
    }

    #[test]
    fn printed_values_round_trip() {
        let config = parse(&[
            "--batch_size",
            "12",
            "--learning_rate",
            "0.0003",
            "--device",
            "GPU",
            "--data_format",
            "NCHW",
            "--iterations",
            "0",
            "--data_dir",
            "/data",
        ])
        .unwrap()
        .unwrap();

        assert_eq!(reparse(&config), config);
    }
}
