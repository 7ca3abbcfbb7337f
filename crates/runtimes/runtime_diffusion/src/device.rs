use anyhow::Result;
use candle_core::Device;

/// Pick the compute device: CUDA, then Metal, then CPU.
pub fn select_device(use_gpu: bool) -> Result<Device> {
    if !use_gpu {
        tracing::info!("Using CPU device (GPU disabled)");
        return Ok(Device::Cpu);
    }

    if candle_core::utils::cuda_is_available() {
        tracing::info!("Using CUDA device");
        return Ok(Device::new_cuda(0)?);
    }

    if candle_core::utils::metal_is_available() {
        tracing::info!("Using Metal device");
        return Ok(Device::new_metal(0)?);
    }

    tracing::info!("Using CPU device (no GPU features enabled)");
    Ok(Device::Cpu)
}

pub fn device_label(device: &Device) -> String {
    if device.is_cuda() {
        "cuda:0".to_string()
    } else if device.is_metal() {
        "metal:0".to_string()
    } else {
        "cpu".to_string()
    }
}
