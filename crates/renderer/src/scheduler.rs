//! The per-frame state machine.
//!
//! [`FrameScheduler::step`] drives one attempt at a frame through
//! WaitFence, AcquireImage, RecordAndSubmit and Present against a
//! [`FrameBackend`]. Out-of-date and suboptimal surfaces are handled here by
//! rebuilding the swapchain; they never reach the caller as errors.

use tracing::{debug, info};

use vkr_platform::{PresentationHost, ResizeFlag};
use vkr_rhi::swapchain::{AcquireOutcome, PresentOutcome};

/// GPU-side operations the scheduler sequences. `slot` is always in
/// `0..frames_in_flight`.
pub trait FrameBackend {
    type Error;

    /// Block until the slot's previous submission has retired.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Acquire the next image, signaling the slot's image-acquired semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error>;

    /// Reset the slot fence, write uniforms, record and submit.
    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> Result<(), Self::Error>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, Self::Error>;

    /// Wait for device idle, tear down every swapchain-derived object and
    /// rebuild at `extent`.
    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    AcquireOutOfDate,
    PresentOutOfDate,
    PresentSuboptimal,
    Resized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain was rebuilt. The frame was presented unless the rebuild
    /// came from acquire.
    SwapchainRebuilt(RebuildReason),
    /// The window closed while waiting for a drawable size.
    Closing,
}

/// Block until the host reports a non-zero framebuffer size.
///
/// Returns `None` if the host starts closing first.
pub fn wait_for_drawable_extent<H: PresentationHost + ?Sized>(host: &mut H) -> Option<(u32, u32)> {
    loop {
        let (width, height) = host.framebuffer_size();
        if width > 0 && height > 0 {
            return Some((width, height));
        }
        if host.should_close() {
            return None;
        }
        debug!("Framebuffer is {}x{}, waiting for events", width, height);
        host.wait_events();
    }
}

#[derive(Debug)]
pub struct FrameScheduler {
    frame_counter: u64,
    frames_in_flight: usize,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frame_counter: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    /// Run one frame attempt. The counter advances whether or not the frame
    /// was presented.
    pub fn step<B, H>(
        &mut self,
        backend: &mut B,
        host: &mut H,
        resize: &ResizeFlag,
    ) -> Result<FrameOutcome, B::Error>
    where
        B: FrameBackend + ?Sized,
        H: PresentationHost + ?Sized,
    {
        let slot = self.current_slot();
        let outcome = Self::run_frame(slot, backend, host, resize);
        self.frame_counter = self.frame_counter.wrapping_add(1);
        outcome
    }

    fn run_frame<B, H>(
        slot: usize,
        backend: &mut B,
        host: &mut H,
        resize: &ResizeFlag,
    ) -> Result<FrameOutcome, B::Error>
    where
        B: FrameBackend + ?Sized,
        H: PresentationHost + ?Sized,
    {
        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date during acquire");
                return Self::rebuild(backend, host, resize, RebuildReason::AcquireOutOfDate);
            }
        };

        backend.record_and_submit(slot, image_index)?;

        let presented = backend.present(slot, image_index)?;
        let resized = resize.take();
        let reason = match presented {
            PresentOutcome::OutOfDate => Some(RebuildReason::PresentOutOfDate),
            PresentOutcome::Suboptimal => Some(RebuildReason::PresentSuboptimal),
            PresentOutcome::Presented if resized => Some(RebuildReason::Resized),
            PresentOutcome::Presented => None,
        };

        match reason {
            Some(reason) => Self::rebuild(backend, host, resize, reason),
            None => Ok(FrameOutcome::Presented),
        }
    }

    fn rebuild<B, H>(
        backend: &mut B,
        host: &mut H,
        resize: &ResizeFlag,
        reason: RebuildReason,
    ) -> Result<FrameOutcome, B::Error>
    where
        B: FrameBackend + ?Sized,
        H: PresentationHost + ?Sized,
    {
        let Some(extent) = wait_for_drawable_extent(host) else {
            info!("Window closing before swapchain rebuild");
            return Ok(FrameOutcome::Closing);
        };

        info!(
            "Rebuilding swapchain at {}x{} ({:?})",
            extent.0, extent.1, reason
        );
        backend.recreate_swapchain(extent)?;
        resize.take();
        Ok(FrameOutcome::SwapchainRebuilt(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Submit(usize, u32),
        Present(usize, u32),
        Recreate((u32, u32)),
    }

    /// Simulated GPU: a submitted slot stays in flight until waited on.
    struct MockBackend {
        calls: Vec<Call>,
        in_flight: Vec<bool>,
        max_in_flight: usize,
        acquire_results: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        next_image: u32,
        image_count: u32,
        fail_submit: bool,
    }

    impl MockBackend {
        fn new(frames: usize) -> Self {
            Self {
                calls: Vec::new(),
                in_flight: vec![false; frames],
                max_in_flight: 0,
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                next_image: 0,
                image_count: 3,
                fail_submit: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        type Error = String;

        fn wait_for_slot(&mut self, slot: usize) -> Result<(), String> {
            self.calls.push(Call::Wait(slot));
            self.in_flight[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, String> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn record_and_submit(&mut self, slot: usize, image_index: u32) -> Result<(), String> {
            if self.fail_submit {
                return Err("device lost".to_string());
            }
            assert!(!self.in_flight[slot], "slot {slot} resubmitted while in flight");
            self.calls.push(Call::Submit(slot, image_index));
            self.in_flight[slot] = true;
            let pending = self.in_flight.iter().filter(|&&f| f).count();
            self.max_in_flight = self.max_in_flight.max(pending);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, String> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_results
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self, extent: (u32, u32)) -> Result<(), String> {
            self.calls.push(Call::Recreate(extent));
            // Recreation waits for device idle.
            self.in_flight.iter_mut().for_each(|f| *f = false);
            Ok(())
        }
    }

    struct MockHost {
        sizes: VecDeque<(u32, u32)>,
        size: (u32, u32),
        close_after_waits: Option<usize>,
        waits: usize,
    }

    impl MockHost {
        fn new(size: (u32, u32)) -> Self {
            Self {
                sizes: VecDeque::new(),
                size,
                close_after_waits: None,
                waits: 0,
            }
        }
    }

    impl PresentationHost for MockHost {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.size
        }

        fn should_close(&self) -> bool {
            self.close_after_waits.is_some_and(|n| self.waits >= n)
        }

        fn poll_events(&mut self) {}

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(size) = self.sizes.pop_front() {
                self.size = size;
            }
        }
    }

    #[test]
    fn test_happy_path_order() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        let mut host = MockHost::new((800, 600));
        let resize = ResizeFlag::default();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Submit(0, 0),
                Call::Present(0, 0)
            ]
        );
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn test_slots_rotate() {
        let mut scheduler = FrameScheduler::new(3);
        let mut backend = MockBackend::new(3);
        let mut host = MockHost::new((800, 600));
        let resize = ResizeFlag::default();

        let slots: Vec<usize> = (0..7)
            .map(|_| {
                let slot = scheduler.current_slot();
                scheduler.step(&mut backend, &mut host, &resize).unwrap();
                slot
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_at_most_n_frames_in_flight() {
        for frames in 1..=4 {
            let mut scheduler = FrameScheduler::new(frames);
            let mut backend = MockBackend::new(frames);
            let mut host = MockHost::new((800, 600));
            let resize = ResizeFlag::default();

            for _ in 0..20 {
                scheduler.step(&mut backend, &mut host, &resize).unwrap();
            }

            assert!(backend.max_in_flight <= frames);
            assert_eq!(backend.max_in_flight, frames);
        }
    }

    #[test]
    fn test_acquire_out_of_date_skips_submit_and_advances() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);
        let mut host = MockHost::new((1024, 768));
        let resize = ResizeFlag::default();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::SwapchainRebuilt(RebuildReason::AcquireOutOfDate)
        );
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Recreate((1024, 768))]
        );
        assert_eq!(scheduler.frame_counter(), 1);
        assert_eq!(scheduler.current_slot(), 1);

        // The next frame proceeds normally on the next slot.
        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(1, _))), 1);
    }

    #[test]
    fn test_suboptimal_acquire_still_renders() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        });
        let mut host = MockHost::new((800, 600));
        let resize = ResizeFlag::default();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert!(backend.calls.contains(&Call::Submit(0, 1)));
    }

    #[test]
    fn test_stale_present_rebuilds_then_recovers() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.present_results.push_back(PresentOutcome::OutOfDate);
        backend.present_results.push_back(PresentOutcome::Suboptimal);
        let mut host = MockHost::new((800, 600));
        let resize = ResizeFlag::default();

        assert_eq!(
            scheduler.step(&mut backend, &mut host, &resize).unwrap(),
            FrameOutcome::SwapchainRebuilt(RebuildReason::PresentOutOfDate)
        );
        assert_eq!(
            scheduler.step(&mut backend, &mut host, &resize).unwrap(),
            FrameOutcome::SwapchainRebuilt(RebuildReason::PresentSuboptimal)
        );
        assert_eq!(
            scheduler.step(&mut backend, &mut host, &resize).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 3);
    }

    #[test]
    fn test_back_to_back_rebuilds_are_idempotent() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);
        let mut host = MockHost::new((1024, 768));
        let resize = ResizeFlag::default();
        resize.notify();

        for _ in 0..2 {
            assert_eq!(
                scheduler.step(&mut backend, &mut host, &resize).unwrap(),
                FrameOutcome::SwapchainRebuilt(RebuildReason::AcquireOutOfDate)
            );
        }
        assert!(!resize.is_set());

        let recreates: Vec<&Call> = backend
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Recreate(_)))
            .collect();
        assert_eq!(
            recreates,
            vec![&Call::Recreate((1024, 768)), &Call::Recreate((1024, 768))]
        );
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(..))), 0);

        // Nothing between the two rebuilds rendered, yet the next frame is normal.
        assert_eq!(
            scheduler.step(&mut backend, &mut host, &resize).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 1);
        assert_eq!(scheduler.frame_counter(), 3);
    }

    #[test]
    fn test_resize_flag_triggers_rebuild_and_is_cleared() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        let mut host = MockHost::new((640, 480));
        let resize = ResizeFlag::default();
        resize.notify();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(outcome, FrameOutcome::SwapchainRebuilt(RebuildReason::Resized));
        assert!(!resize.is_set());
        assert_eq!(backend.calls.last(), Some(&Call::Recreate((640, 480))));

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
    }

    #[test]
    fn test_minimized_window_blocks_until_nonzero() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        let mut host = MockHost::new((0, 0));
        host.sizes.extend([(0, 0), (0, 0), (320, 200)]);
        let resize = ResizeFlag::default();
        resize.notify();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(outcome, FrameOutcome::SwapchainRebuilt(RebuildReason::Resized));
        assert_eq!(host.waits, 3);
        assert_eq!(backend.calls.last(), Some(&Call::Recreate((320, 200))));
    }

    #[test]
    fn test_close_while_minimized_skips_rebuild() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);
        let mut host = MockHost::new((0, 0));
        host.close_after_waits = Some(2);
        let resize = ResizeFlag::default();

        let outcome = scheduler.step(&mut backend, &mut host, &resize).unwrap();

        assert_eq!(outcome, FrameOutcome::Closing);
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 0);
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn test_fatal_error_propagates_and_counter_advances() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.fail_submit = true;
        let mut host = MockHost::new((800, 600));
        let resize = ResizeFlag::default();

        let err = scheduler.step(&mut backend, &mut host, &resize).unwrap_err();

        assert_eq!(err, "device lost");
        assert_eq!(scheduler.frame_counter(), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
    }

    #[test]
    fn test_wait_for_drawable_extent_returns_immediately() {
        let mut host = MockHost::new((800, 600));
        assert_eq!(wait_for_drawable_extent(&mut host), Some((800, 600)));
        assert_eq!(host.waits, 0);
    }

    #[test]
    fn test_zero_frames_in_flight_is_clamped() {
        let scheduler = FrameScheduler::new(0);
        assert_eq!(scheduler.frames_in_flight(), 1);
        assert_eq!(scheduler.current_slot(), 0);
    }
}
