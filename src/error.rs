use crate::config::DeviceKind;
use crate::data::mat::MatError;
use thiserror::Error;

/// Invalid or missing command-line arguments.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Args(#[from] pico_args::Error),
    #[error("invalid value for {option}: {reason}")]
    OutOfRange {
        option: &'static str,
        reason: &'static str,
    },
    #[error("unused arguments: {0:?}")]
    Unused(Vec<std::ffi::OsString>),
}

/// Any failure that terminates a benchmark run.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device {0} is not supported by the {1} backend")]
    UnsupportedDevice(DeviceKind, &'static str),
    #[error("malformed batch: {0}")]
    Shape(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error(transparent)]
    Mat(#[from] MatError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
