//! The window-system surface the render loop talks to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the frame loop needs from the window system.
pub trait PresentationHost {
    /// Current drawable size in pixels. `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    fn should_close(&self) -> bool;

    /// Process pending events without blocking.
    fn poll_events(&mut self);

    /// Block until at least one event arrives.
    fn wait_events(&mut self);
}

/// Sticky flag set by the window system on resize and cleared by the frame
/// loop once it has rebuilt the swapchain.
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear the flag.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_flag_take_clears() {
        let flag = ResizeFlag::default();
        assert!(!flag.take());

        flag.notify();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.is_set());
        assert!(!flag.take());
    }

    #[test]
    fn test_resize_flag_notifications_coalesce() {
        let flag = ResizeFlag::default();
        flag.notify();
        flag.notify();
        flag.notify();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_resize_flag_shared_between_clones() {
        let flag = ResizeFlag::default();
        let producer = flag.clone();
        std::thread::spawn(move || producer.notify())
            .join()
            .unwrap();
        assert!(flag.take());
    }
}
