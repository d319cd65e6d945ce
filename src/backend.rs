//! Compile-time backend selection and run-time device binding.
//!
//! The backend is chosen with one of the `dev-*` cargo features; the device on
//! that backend is chosen with `--device`. A device the backend cannot drive is
//! only reported when the executor is bound, never while parsing arguments.

use crate::config::DeviceKind;
use crate::error::BenchError;
use burn::prelude::*;

pub type Element = f32;

#[cfg(feature = "dev-ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, i32>;
#[cfg(any(feature = "dev-tch-cpu", feature = "dev-tch-gpu"))]
pub type MainBackend = burn::backend::LibTorch<Element>;
#[cfg(feature = "dev-wgpu")]
pub type MainBackend = burn::backend::Wgpu<Element, i32>;
#[cfg(feature = "dev-cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;

/// Maps the requested [`DeviceKind`] onto a device of the backend.
pub trait SelectDevice: Backend {
    /// Short backend name, used in error messages.
    const NAME: &'static str;

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError>;
}

#[cfg(feature = "dev-ndarray")]
impl SelectDevice for MainBackend {
    const NAME: &'static str = "ndarray";

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError> {
        match kind {
            DeviceKind::Cpu => Ok(burn::backend::ndarray::NdArrayDevice::Cpu),
            DeviceKind::Gpu => Err(BenchError::UnsupportedDevice(kind, Self::NAME)),
        }
    }
}

#[cfg(any(feature = "dev-tch-cpu", feature = "dev-tch-gpu"))]
impl SelectDevice for MainBackend {
    const NAME: &'static str = "libtorch";

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError> {
        use burn::backend::libtorch::LibTorchDevice;
        match kind {
            DeviceKind::Cpu => Ok(LibTorchDevice::Cpu),
            #[cfg(not(target_os = "macos"))]
            DeviceKind::Gpu => Ok(LibTorchDevice::Cuda(0)),
            #[cfg(target_os = "macos")]
            DeviceKind::Gpu => Ok(LibTorchDevice::Mps),
        }
    }
}

#[cfg(feature = "dev-wgpu")]
impl SelectDevice for MainBackend {
    const NAME: &'static str = "wgpu";

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError> {
        use burn::backend::wgpu::WgpuDevice;
        match kind {
            DeviceKind::Cpu => Ok(WgpuDevice::Cpu),
            DeviceKind::Gpu => Ok(WgpuDevice::DefaultDevice),
        }
    }
}

#[cfg(feature = "dev-cuda")]
impl SelectDevice for MainBackend {
    const NAME: &'static str = "cuda";

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError> {
        match kind {
            DeviceKind::Cpu => Err(BenchError::UnsupportedDevice(kind, Self::NAME)),
            DeviceKind::Gpu => Ok(Default::default()),
        }
    }
}

impl<B: SelectDevice> SelectDevice for burn::backend::Autodiff<B> {
    const NAME: &'static str = B::NAME;

    fn select_device(kind: DeviceKind) -> Result<<Self as Backend>::Device, BenchError> {
        B::select_device(kind)
    }
}

#[cfg(not(feature = "_dev-has-backend"))]
std::compile_error!(
    "No dev backend selected. Enable one of the dev-* features in burn-vgg16-bench/Cargo.toml."
);
