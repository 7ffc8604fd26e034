//! 計算バックエンドの型定義
//!
//! CPU (NdArray) と GPU (WGPU) の2種類を `DeviceType` で切り替えます。
//! 学習時はそれぞれを `Autodiff` で包んで使います。

use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

/// CPU推論用
pub type CpuBackend = NdArray<f32>;
/// GPU推論用
pub type GpuBackend = Wgpu<f32, i32>;
/// CPU学習用
pub type CpuTrainBackend = Autodiff<CpuBackend>;
/// GPU学習用
pub type GpuTrainBackend = Autodiff<GpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

pub fn gpu_device() -> WgpuDevice {
    WgpuDevice::default()
}
