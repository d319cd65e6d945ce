//! Training benchmark of a VGG16 network with batch normalization and dropout.

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod metric;
pub mod model;
pub mod training;
