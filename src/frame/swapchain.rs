// Swapchain Lifecycle Manager
//
// The swapchain (images + views + framebuffers) is a value that is destroyed
// and rebuilt wholesale when the surface changes. Frame-slot buffers, bindings
// and fences are resolution independent and never touched here.

use ash::vk;

use crate::backend::{DrawableSurface, Gpu};
use crate::error::GpuError;

/// Presentable images and everything that depends on their extent.
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain, then one view and one framebuffer per image.
    pub fn create(gpu: &mut impl Gpu, extent: vk::Extent2D) -> Result<Self, GpuError> {
        let created = gpu.create_swapchain(extent)?;

        let mut swapchain = Self {
            handle: created.swapchain,
            images: created.images,
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: created.format,
            extent: created.extent,
        };

        if let Err(e) = swapchain.create_targets(gpu) {
            swapchain.destroy(gpu);
            return Err(e);
        }

        log::info!(
            "Created swapchain {}x{} with {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    fn create_targets(&mut self, gpu: &mut impl Gpu) -> Result<(), GpuError> {
        for &image in &self.images {
            let view = gpu.create_image_view(image, self.format)?;
            self.image_views.push(view);
            let framebuffer = gpu.create_framebuffer(view, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Destroy in reverse-dependency order: framebuffers, views, swapchain.
    pub fn destroy(self, gpu: &mut impl Gpu) {
        for framebuffer in self.framebuffers {
            gpu.destroy_framebuffer(framebuffer);
        }
        for view in self.image_views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }
}

/// Result of a rebuild attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { extent: vk::Extent2D, image_count: usize },
    /// The drawable area is zero; try again on a later tick.
    Deferred,
}

pub struct SwapchainManager {
    current: Option<Swapchain>,
    /// Set by out-of-date / suboptimal results and resize requests.
    invalid: bool,
    rebuild_count: u64,
}

impl SwapchainManager {
    /// Build the first swapchain, or start invalid if the window is minimized.
    pub fn new(gpu: &mut impl Gpu, drawable: &dyn DrawableSurface) -> Result<Self, GpuError> {
        let extent = drawable.drawable_extent();
        if is_zero(extent) {
            log::info!("Window minimized at startup, deferring swapchain creation");
            return Ok(Self {
                current: None,
                invalid: true,
                rebuild_count: 0,
            });
        }

        Ok(Self {
            current: Some(Swapchain::create(gpu, extent)?),
            invalid: false,
            rebuild_count: 0,
        })
    }

    /// The live swapchain, if it is usable for this tick.
    pub fn current(&self) -> Option<&Swapchain> {
        if self.invalid {
            None
        } else {
            self.current.as_ref()
        }
    }

    /// Mark the swapchain stale; the next tick rebuilds before recording.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    pub fn needs_rebuild(&self) -> bool {
        self.invalid || self.current.is_none()
    }

    /// Number of completed rebuilds since creation.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Tear down and recreate against the current drawable area.
    ///
    /// Drains the device first: this is a full synchronization point, which is
    /// acceptable because resizes are rare.
    pub fn rebuild(
        &mut self,
        gpu: &mut impl Gpu,
        drawable: &dyn DrawableSurface,
    ) -> Result<RebuildOutcome, GpuError> {
        let extent = drawable.drawable_extent();
        if is_zero(extent) {
            self.invalid = true;
            log::debug!("Drawable area is zero, swapchain rebuild deferred");
            return Ok(RebuildOutcome::Deferred);
        }

        gpu.wait_idle()?;

        // The surface can only own one swapchain: destroy before creating
        if let Some(old) = self.current.take() {
            old.destroy(gpu);
        }
        self.invalid = true;

        let swapchain = match Swapchain::create(gpu, extent) {
            Ok(swapchain) => swapchain,
            // Surface still reports a zero size even though the window does not
            Err(e) if e.is_out_of_date() => {
                log::debug!("Surface not ready for a new swapchain, rebuild deferred");
                return Ok(RebuildOutcome::Deferred);
            }
            Err(e) => return Err(e),
        };
        let outcome = RebuildOutcome::Rebuilt {
            extent: swapchain.extent(),
            image_count: swapchain.image_count(),
        };

        self.current = Some(swapchain);
        self.invalid = false;
        self.rebuild_count += 1;
        log::debug!("Swapchain rebuild #{} complete", self.rebuild_count);

        Ok(outcome)
    }

    pub fn destroy(&mut self, gpu: &mut impl Gpu) {
        if let Some(swapchain) = self.current.take() {
            swapchain.destroy(gpu);
        }
    }
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::FixedDrawable;
    use crate::backend::HeadlessGpu;

    #[test]
    fn rebuild_twice_is_idempotent_and_leak_free() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let drawable = FixedDrawable::new(800, 600);
        let mut manager = SwapchainManager::new(&mut gpu, &drawable).unwrap();
        let live_before = probe.live();

        let first = manager.rebuild(&mut gpu, &drawable).unwrap();
        let live_first = probe.live();
        let second = manager.rebuild(&mut gpu, &drawable).unwrap();
        let live_second = probe.live();

        assert_eq!(first, second);
        assert_eq!(
            first,
            RebuildOutcome::Rebuilt {
                extent: vk::Extent2D { width: 800, height: 600 },
                image_count: probe.swapchain_image_count(),
            }
        );
        assert_eq!(live_before, live_first);
        assert_eq!(live_first, live_second);
        assert!(probe.violations().is_empty(), "{:?}", probe.violations());
        assert_eq!(manager.rebuild_count(), 2);

        manager.destroy(&mut gpu);
        let live = probe.live();
        assert_eq!((live.swapchains, live.image_views, live.framebuffers), (0, 0, 0));
    }

    #[test]
    fn minimized_window_defers_rebuild() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let drawable = FixedDrawable::new(0, 0);
        let mut manager = SwapchainManager::new(&mut gpu, &drawable).unwrap();
        assert!(manager.current().is_none());
        assert!(manager.needs_rebuild());

        assert_eq!(manager.rebuild(&mut gpu, &drawable).unwrap(), RebuildOutcome::Deferred);
        assert_eq!(probe.live().swapchains, 0);
        assert_eq!(probe.wait_idle_count(), 0);

        drawable.resize(640, 480);
        assert!(matches!(
            manager.rebuild(&mut gpu, &drawable).unwrap(),
            RebuildOutcome::Rebuilt { .. }
        ));
        assert_eq!(manager.current().unwrap().extent().width, 640);
        assert_eq!(probe.wait_idle_count(), 1);
    }

    #[test]
    fn resize_changes_extent() {
        let mut gpu = HeadlessGpu::new();
        let drawable = FixedDrawable::new(800, 600);
        let mut manager = SwapchainManager::new(&mut gpu, &drawable).unwrap();

        drawable.resize(1024, 768);
        manager.invalidate();
        assert!(manager.current().is_none());
        manager.rebuild(&mut gpu, &drawable).unwrap();
        assert_eq!(
            manager.current().unwrap().extent(),
            vk::Extent2D { width: 1024, height: 768 }
        );
    }
}
