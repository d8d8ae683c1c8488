// Compute device selection
//
// Resolved once per run; the chosen device is fixed for the run's lifetime.

use candle_core::{Device, DeviceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PipelineError, Result};

/// Device preference for training
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    /// Best available accelerator, else CPU
    #[default]
    Auto,
    /// CPU (slow, works everywhere)
    Cpu,
    /// NVIDIA CUDA GPU (requires the `cuda` feature)
    Cuda,
    /// Apple Metal GPU (requires the `metal` feature)
    Metal,
}

impl ComputeDevice {
    /// Get short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ComputeDevice::Auto => "auto",
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Metal => "metal",
        }
    }

    /// Check if this device can be used in the current build and machine
    pub fn is_available(&self) -> bool {
        match self {
            ComputeDevice::Auto | ComputeDevice::Cpu => true,
            ComputeDevice::Cuda => candle_core::utils::cuda_is_available(),
            ComputeDevice::Metal => candle_core::utils::metal_is_available(),
        }
    }

    /// Select best available device automatically
    pub fn auto_select() -> ComputeDevice {
        if ComputeDevice::Cuda.is_available() {
            return ComputeDevice::Cuda;
        }
        if ComputeDevice::Metal.is_available() {
            return ComputeDevice::Metal;
        }
        ComputeDevice::Cpu
    }

    /// Resolve `Auto` to a concrete device
    pub fn effective(&self) -> ComputeDevice {
        match self {
            ComputeDevice::Auto => ComputeDevice::auto_select(),
            device => *device,
        }
    }

    /// Allocate the candle device
    pub fn open(&self) -> Result<Device> {
        let effective = self.effective();
        if !effective.is_available() {
            return Err(PipelineError::training(format!(
                "{} device requested but not available in this build or on this machine",
                effective.name()
            )));
        }

        let device = match effective {
            ComputeDevice::Cuda => Device::new_cuda(0),
            ComputeDevice::Metal => Device::new_metal(0),
            ComputeDevice::Auto | ComputeDevice::Cpu => Ok(Device::Cpu),
        }
        .map_err(|e| {
            PipelineError::training(format!("failed to open {} device: {}", effective.name(), e))
        })?;

        tracing::info!(
            requested = self.name(),
            device = %device_label(&device),
            "Selected compute device"
        );
        Ok(device)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ComputeDevice::Auto),
            "cpu" => Ok(ComputeDevice::Cpu),
            "cuda" | "gpu" => Ok(ComputeDevice::Cuda),
            "metal" => Ok(ComputeDevice::Metal),
            other => Err(format!(
                "unknown device '{}' (expected auto, cpu, cuda or metal)",
                other
            )),
        }
    }
}

/// Label recorded in artifact metadata, e.g. `cpu` or `cuda:0`
pub fn device_label(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{}", gpu_id),
        DeviceLocation::Metal { gpu_id } => format!("metal:{}", gpu_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_names() {
        assert_eq!("auto".parse::<ComputeDevice>().unwrap(), ComputeDevice::Auto);
        assert_eq!("CPU".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cpu);
        assert_eq!("gpu".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cuda);
        assert!("tpu".parse::<ComputeDevice>().is_err());
    }

    #[test]
    fn test_cpu_always_opens() {
        let device = ComputeDevice::Cpu.open().unwrap();
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn test_auto_resolves_to_concrete_device() {
        assert_ne!(ComputeDevice::Auto.effective(), ComputeDevice::Auto);
    }
}
