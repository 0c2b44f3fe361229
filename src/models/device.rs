//! Compute device selection
//!
//! Picks the ONNX Runtime execution provider the encoder runs on. Preference
//! order is a CUDA GPU, then CoreML (Apple unified memory), then the CPU.

use ort::execution_providers::coreml::CoreMLExecutionProvider;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Backend the model weights and input tensors live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[serde(alias = "gpu")]
    Cuda,
    #[serde(alias = "mps")]
    CoreMl,
    Cpu,
}

impl Device {
    /// Use the explicit override when given, otherwise probe the hardware.
    pub fn resolve(preferred: Option<Device>) -> Device {
        preferred.unwrap_or_else(select_device)
    }

    /// Execution providers to register for this device, CPU last as fallback.
    pub fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        let cpu = CPUExecutionProvider::default().build();
        match self {
            Device::Cuda => vec![CUDAExecutionProvider::default().build(), cpu],
            Device::CoreMl => vec![CoreMLExecutionProvider::default().build(), cpu],
            Device::Cpu => vec![cpu],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::CoreMl => "coreml",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspect the runtime and pick the best available device.
pub fn select_device() -> Device {
    let cuda = CUDAExecutionProvider::default().is_available().unwrap_or(false);
    let coreml = CoreMLExecutionProvider::default().is_available().unwrap_or(false);
    debug!(cuda, coreml, "Probed execution providers");
    choose_device(cuda, coreml)
}

fn choose_device(cuda_available: bool, coreml_available: bool) -> Device {
    if cuda_available {
        Device::Cuda
    } else if coreml_available {
        Device::CoreMl
    } else {
        Device::Cpu
    }
}
