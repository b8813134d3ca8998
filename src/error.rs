//! Error types for GPU calls and frame ticks.
//!
//! Two layers:
//! - [`GpuError`] is returned by every [`crate::backend::Gpu`] call. The only
//!   recoverable variant is [`GpuError::OutOfDate`]; everything else means the
//!   device, driver or configuration is unusable.
//! - [`FrameError`] wraps a fatal `GpuError` with the scheduler stage and frame
//!   slot it happened in. A tick that returns `Err` cannot be retried.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::frame::FrameStage;

/// Failure of a single backend operation.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The presentation surface changed and the swapchain must be rebuilt.
    #[error("swapchain is out of date")]
    OutOfDate,

    /// A Vulkan call returned an error code.
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    /// No memory type satisfies the request, or the heap is exhausted.
    #[error("gpu memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    /// A SPIR-V binary could not be read or is malformed.
    #[error("failed to load shader {path:?}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Submission order broke a fence or semaphore rule.
    #[error("synchronization violation: {0}")]
    Protocol(String),

    /// Setup was handed zero particles.
    #[error("particle set is empty")]
    EmptyParticleSet,

    /// The platform or device lacks a required capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl GpuError {
    /// True for the surface invalidation codes the swapchain manager recovers from.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            GpuError::OutOfDate | GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Fatal failure of a frame tick.
#[derive(Error, Debug)]
#[error("frame slot {slot} failed during {stage}: {source}")]
pub struct FrameError {
    /// Stage of the tick that failed.
    pub stage: FrameStage,
    /// Index of the frame slot that was being processed.
    pub slot: usize,
    #[source]
    pub source: GpuError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recognized_in_both_forms() {
        assert!(GpuError::OutOfDate.is_out_of_date());
        assert!(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!GpuError::Protocol("x".into()).is_out_of_date());
    }

    #[test]
    fn frame_error_names_stage_and_slot() {
        let err = FrameError {
            stage: FrameStage::Present,
            slot: 1,
            source: GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR),
        };
        let msg = err.to_string();
        assert!(msg.contains("slot 1"));
        assert!(msg.contains("present"));
    }
}
