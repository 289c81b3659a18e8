//! Window management using winit.
//!
//! The event loop is pumped by the caller rather than handed control, so the
//! render loop can poll between frames and block while the window is
//! minimized.

use std::ffi::c_char;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use vkr_core::{Error, Result, WindowConfig};

use crate::host::{PresentationHost, ResizeFlag};

/// Number of zero-timeout pumps allowed for the platform to deliver `resumed`.
const STARTUP_PUMPS: usize = 64;

/// Control flow that lets a pump with `timeout` block for that long.
/// `None` waits for the next event.
fn control_flow_for(timeout: Option<Duration>) -> ControlFlow {
    match timeout {
        None => ControlFlow::Wait,
        Some(timeout) if timeout.is_zero() => ControlFlow::Poll,
        Some(timeout) => ControlFlow::WaitUntil(Instant::now() + timeout),
    }
}

/// RAII wrapper for a Vulkan surface.
///
/// The instance the surface was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as the loader, and destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Arc<WinitWindow>>,
    close_requested: bool,
    resize: ResizeFlag,
    creation_error: Option<String>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                self.creation_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized: {}x{}", size.width, size.height);
                self.resize.notify();
            }
            _ => {}
        }
    }
}

/// A resizable window driven by a pumped winit event loop.
pub struct Window {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl Window {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let mut this = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                close_requested: false,
                resize: ResizeFlag::default(),
                creation_error: None,
            },
        };

        for _ in 0..STARTUP_PUMPS {
            this.pump(Some(Duration::ZERO));
            if this.state.window.is_some() || this.state.creation_error.is_some() {
                break;
            }
        }

        if let Some(e) = this.state.creation_error.take() {
            return Err(Error::Window(e));
        }
        if this.state.window.is_none() {
            return Err(Error::Window(
                "event loop never resumed, no window was created".to_string(),
            ));
        }

        info!("Window created: {}x{}", config.width, config.height);
        Ok(this)
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        // pump_app_events never sleeps longer than the control flow allows.
        self.event_loop.set_control_flow(control_flow_for(timeout));
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            warn!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    fn inner(&self) -> Result<&WinitWindow> {
        self.state
            .window
            .as_deref()
            .ok_or_else(|| Error::Window("window is not available".to_string()))
    }

    /// Flag raised whenever the window reports a resize.
    pub fn resize_flag(&self) -> ResizeFlag {
        self.state.resize.clone()
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The returned pointers reference static strings owned by the Vulkan
    /// loader.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .inner()?
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {e}")))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Surface(format!("cannot enumerate surface extensions: {e}")))?;

        debug!(
            "Required surface extensions: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns valid, null-terminated static strings.
                .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );
        Ok(extensions.to_vec())
    }

    /// Create a Vulkan surface for this window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let window = self.inner()?;
        let display_handle = window
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| Error::Surface(format!("no window handle: {e}")))?;

        // SAFETY: entry and instance are valid, the handles come from a live
        // winit window, and Surface::drop destroys the result.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("vkCreateSurfaceKHR failed: {e}")))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

impl PresentationHost for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state
            .window
            .as_ref()
            .map(|window| {
                let size = window.inner_size();
                (size.width, size.height)
            })
            .unwrap_or((0, 0))
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_pump_waits_for_events() {
        assert_eq!(control_flow_for(None), ControlFlow::Wait);
    }

    #[test]
    fn test_zero_timeout_polls() {
        assert_eq!(control_flow_for(Some(Duration::ZERO)), ControlFlow::Poll);
    }

    #[test]
    fn test_timed_pump_waits_until_deadline() {
        let before = Instant::now();
        match control_flow_for(Some(Duration::from_millis(16))) {
            ControlFlow::WaitUntil(deadline) => {
                assert!(deadline >= before + Duration::from_millis(16))
            }
            other => panic!("expected WaitUntil, got {other:?}"),
        }
    }
}
