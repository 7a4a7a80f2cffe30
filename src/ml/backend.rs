// ============================================================
// Layer 5 — Backend selection
// ============================================================
// NdArray (CPU) by default; `--features wgpu` runs the same code
// on the GPU through WGPU.

#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray;
#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

pub type Device = <InferenceBackend as burn::tensor::backend::Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}
