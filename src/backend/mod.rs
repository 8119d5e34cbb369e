//! Hardware-facing subsystems: the kernel display adapter, the GPU-backed
//! swapchain and the raw input pipeline.

pub mod drm;
pub mod gpu;
pub mod input;
