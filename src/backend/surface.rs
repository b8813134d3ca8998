// Window surface creation from raw-window-handle 0.6 handles
//
// Supports Win32, Xlib and Wayland. Anything else is reported as unsupported
// rather than panicking.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::os::raw::c_char;

use super::DrawableSurface;
use crate::error::GpuError;

/// Instance extensions needed to create a surface on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>, GpuError> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => return Err(GpuError::Unsupported(format!("display server {other:?}"))),
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Create a `VkSurfaceKHR` for the given window.
pub fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR, GpuError> {
    let surface = unsafe {
        match (display, window) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE;
                let hwnd = handle.hwnd.get() as vk::HWND;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display
                    .display
                    .ok_or_else(|| GpuError::Unsupported("Xlib window without a display".into()))?;
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy.as_ptr().cast())
                    .window(handle.window);
                khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr().cast())
                    .surface(handle.surface.as_ptr().cast());
                khr::WaylandSurface::new(entry, instance)
                    .create_wayland_surface(&create_info, None)?
            }
            (display, window) => {
                return Err(GpuError::Unsupported(format!(
                    "window handle {window:?} on display {display:?}"
                )))
            }
        }
    };
    Ok(surface)
}

impl DrawableSurface for winit::window::Window {
    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
