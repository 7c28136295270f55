// SPDX-License-Identifier: CEPL-1.0
//! Frame orchestration.
//!
//! One call to [`FrameOrchestrator::draw_frame`] is one iteration of the
//! render loop:
//!
//! 1. wait on the current slot's fence (bounds CPU run-ahead to N frames)
//! 2. acquire a chain image, signalling the slot's image-available semaphore
//! 3. record the slot's command buffer against that image
//! 4. reset the slot's fence, then submit
//! 5. present, waiting on render-finished
//! 6. recreate the chain when acquire/present report staleness or a resize
//!    was flagged
//! 7. advance to the next slot only after an iteration that did not recreate
//!
//! A rebuild against a surface with no area is deferred: the chain stays
//! stale and every following iteration retries the rebuild before touching
//! any slot.
//!
//! The GPU specifics live behind [`FrameBackend`].

use crate::{FrameError, RenderSize};
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Upper bound on frame slots.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Result of asking the chain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// An image was acquired; its image-available semaphore will signal.
    Image { index: u32, suboptimal: bool },
    /// The surface changed underneath the chain. Nothing was acquired.
    OutOfDate,
}

/// Result of a present request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    /// Out-of-date or suboptimal: the chain should be rebuilt.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image_index: u32 },
    /// The chain was rebuilt; the slot was not advanced.
    Recreated,
    /// The framebuffer or the surface has zero area; no image was acquired.
    Skipped,
}

/// Result of a chain rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuilt {
    Ready,
    /// The surface reports zero area. The old chain is gone and no new one
    /// exists yet.
    Deferred,
}

/// The GPU-side steps of a frame, addressed by frame slot.
///
/// Implementations own the slot resources (fence, semaphores, command
/// buffer) and the chain. Staleness is reported through return values, not
/// errors.
pub trait FrameBackend {
    /// Block until the last submission that used `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError>;

    /// Rebuild the slot's command buffer against chain image `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError>;

    fn reset_fence(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Submit the slot's command buffer, waiting on image-available and
    /// signalling render-finished plus the slot's fence.
    fn submit(&mut self, slot: usize) -> Result<(), FrameError>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented, FrameError>;

    /// Wait for idle, tear down the chain and everything sized by it, and
    /// rebuild for `size`.
    fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuilt, FrameError>;

    /// False after a deferred rebuild, or when startup found no surface area.
    fn chain_ready(&self) -> bool;
}

/// Thread-safe "the window was resized" flag.
///
/// The window side raises it; the orchestrator reads and clears it once per
/// iteration, at the present-time staleness check.
#[derive(Clone, Debug, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Round-robin owner of the frame-slot index.
#[derive(Debug)]
pub struct FrameOrchestrator {
    frames_in_flight: usize,
    current_frame: usize,
    resized: ResizeFlag,
    frames_presented: u64,
    recreations: u64,
}

impl FrameOrchestrator {
    /// `frames_in_flight` is clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(frames_in_flight: usize) -> Self {
        let clamped = frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        if clamped != frames_in_flight {
            warn!(
                "frames_in_flight {} out of range, using {}",
                frames_in_flight, clamped
            );
        }
        Self {
            frames_in_flight: clamped,
            current_frame: 0,
            resized: ResizeFlag::new(),
            frames_presented: 0,
            recreations: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Handle for the window side to flag resizes.
    pub fn resize_flag(&self) -> ResizeFlag {
        self.resized.clone()
    }

    pub fn draw_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        size: RenderSize,
    ) -> Result<FrameOutcome, FrameError> {
        if size.is_empty() {
            trace!(
                "framebuffer {}x{} has no area, skipping frame",
                size.width,
                size.height
            );
            return Ok(FrameOutcome::Skipped);
        }

        if !backend.chain_ready() {
            return self.recreate(backend, size);
        }

        let slot = self.current_frame;
        backend.wait_for_slot(slot)?;

        let (image_index, acquire_suboptimal) = match backend.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                // Nothing was submitted, so the fence stays signalled.
                debug!(slot, "acquire reported an out-of-date chain");
                return self.recreate(backend, size);
            }
        };
        trace!(slot, image_index, "acquired");

        backend.record(slot, image_index)?;
        backend.reset_fence(slot)?;
        backend.submit(slot)?;

        let presented = backend.present(slot, image_index)?;
        let resized = self.resized.take();
        if acquire_suboptimal || resized || presented == Presented::Stale {
            debug!(
                slot,
                acquire_suboptimal,
                resized,
                stale_present = presented == Presented::Stale,
                "chain needs recreation"
            );
            let outcome = self.recreate(backend, size)?;
            if resized && outcome == FrameOutcome::Skipped {
                self.resized.raise();
            }
            return Ok(outcome);
        }

        self.frames_presented += 1;
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        Ok(FrameOutcome::Presented { slot, image_index })
    }

    /// `Recreated` when the backend rebuilt the chain, `Skipped` when the
    /// surface had no area and the rebuild is left for a later iteration.
    fn recreate<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        size: RenderSize,
    ) -> Result<FrameOutcome, FrameError> {
        match backend.recreate_chain(size)? {
            Rebuilt::Ready => {
                self.recreations += 1;
                debug!(
                    "chain recreated for {}x{} ({} total)",
                    size.width, size.height, self.recreations
                );
                Ok(FrameOutcome::Recreated)
            }
            Rebuilt::Deferred => {
                debug!("surface has no area; chain rebuild deferred");
                Ok(FrameOutcome::Skipped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct FakeChain {
        id: u32,
        extent: RenderSize,
        images: u32,
        framebuffers: u32,
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Step {
        Wait(usize),
        Acquire(usize),
        Record { slot: usize, chain: u32, image: u32 },
        Reset(usize),
        Submit(usize),
        Present(usize, u32),
        Recreate(RenderSize),
        Deferred,
    }

    /// Emulates a GPU that only finishes work when the CPU waits on it,
    /// which is the worst case for run-ahead.
    struct FakeBackend {
        pending: Vec<bool>,
        max_pending: usize,
        chain: Option<FakeChain>,
        /// Extent the surface reports, when it differs from the window's.
        surface: Option<RenderSize>,
        built: u32,
        destroyed: Vec<u32>,
        next_image: u32,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
        fail_submit: bool,
        steps: Vec<Step>,
    }

    impl FakeBackend {
        fn new(slots: usize, extent: RenderSize) -> Self {
            Self {
                pending: vec![false; slots],
                max_pending: 0,
                chain: Some(FakeChain {
                    id: 0,
                    extent,
                    images: 3,
                    framebuffers: 3,
                }),
                surface: None,
                built: 1,
                destroyed: Vec::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_submit: false,
                steps: Vec::new(),
            }
        }

        fn chain(&self) -> FakeChain {
            self.chain.expect("chain must always exist between frames")
        }

        fn count(&self, pred: impl Fn(&Step) -> bool) -> usize {
            self.steps.iter().filter(|s| pred(*s)).count()
        }
    }

    impl FrameBackend for FakeBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
            self.steps.push(Step::Wait(slot));
            self.pending[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError> {
            self.steps.push(Step::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let chain = self.chain();
            let index = self.next_image % chain.images;
            self.next_image += 1;
            Ok(Acquired::Image {
                index,
                suboptimal: false,
            })
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
            let chain = self.chain();
            assert!(image_index < chain.framebuffers, "dangling framebuffer");
            self.steps.push(Step::Record {
                slot,
                chain: chain.id,
                image: image_index,
            });
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> Result<(), FrameError> {
            assert!(!self.pending[slot], "reset of an in-flight fence");
            self.steps.push(Step::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<(), FrameError> {
            if self.fail_submit {
                return Err(FrameError::FrameSubmitFailed("injected".into()));
            }
            assert!(!self.pending[slot], "slot reused before its fence signalled");
            self.pending[slot] = true;
            let in_flight = self.pending.iter().filter(|p| **p).count();
            self.max_pending = self.max_pending.max(in_flight);
            self.steps.push(Step::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented, FrameError> {
            self.steps.push(Step::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(Presented::Optimal))
        }

        fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuilt, FrameError> {
            // device idle: every fence completes
            self.pending.iter_mut().for_each(|p| *p = false);
            if let Some(old) = self.chain.take() {
                assert!(!self.destroyed.contains(&old.id));
                self.destroyed.push(old.id);
            }
            let extent = self.surface.unwrap_or(size);
            if extent.is_empty() {
                self.steps.push(Step::Deferred);
                return Ok(Rebuilt::Deferred);
            }
            let images = if extent.width < 500 { 2 } else { 3 };
            self.chain = Some(FakeChain {
                id: self.built,
                extent,
                images,
                framebuffers: images,
            });
            self.built += 1;
            self.next_image = 0;
            self.steps.push(Step::Recreate(size));
            Ok(Rebuilt::Ready)
        }

        fn chain_ready(&self) -> bool {
            self.chain.is_some()
        }
    }

    const SIZE: RenderSize = RenderSize::new(800, 600);

    #[test]
    fn first_frame_presents_and_advances() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);

        let outcome = orch.draw_frame(&mut gpu, SIZE).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0
            }
        );
        assert_eq!(orch.current_frame(), 1);
        assert_eq!(
            gpu.steps,
            vec![
                Step::Wait(0),
                Step::Acquire(0),
                Step::Record {
                    slot: 0,
                    chain: 0,
                    image: 0
                },
                Step::Reset(0),
                Step::Submit(0),
                Step::Present(0, 0),
            ]
        );
    }

    #[test]
    fn in_flight_submissions_never_exceed_slot_count() {
        for slots in 1..=4 {
            let mut orch = FrameOrchestrator::new(slots);
            let mut gpu = FakeBackend::new(slots, SIZE);
            for _ in 0..25 {
                orch.draw_frame(&mut gpu, SIZE).unwrap();
            }
            assert!(gpu.max_pending <= slots);
            assert_eq!(gpu.max_pending, slots);
            assert_eq!(orch.frames_presented(), 25);
        }
    }

    #[test]
    fn slots_rotate_independently_of_image_count() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        let mut seen = Vec::new();
        for _ in 0..6 {
            match orch.draw_frame(&mut gpu, SIZE).unwrap() {
                FrameOutcome::Presented { slot, image_index } => seen.push((slot, image_index)),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2)]);
    }

    #[test]
    fn out_of_date_acquire_recreates_without_touching_fence() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        gpu.acquire_script.push_back(Acquired::OutOfDate);

        let outcome = orch.draw_frame(&mut gpu, SIZE).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(orch.current_frame(), 0);
        assert_eq!(orch.recreations(), 1);
        assert_eq!(gpu.count(|s| matches!(s, Step::Reset(_))), 0);
        assert_eq!(gpu.count(|s| matches!(s, Step::Submit(_))), 0);
        assert_eq!(gpu.steps.last(), Some(&Step::Recreate(SIZE)));
    }

    #[test]
    fn stale_present_recreates_and_keeps_slot() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        gpu.present_script.push_back(Presented::Stale);

        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(orch.current_frame(), 0);
        assert_eq!(orch.frames_presented(), 0);

        // The same slot is reused on the next iteration.
        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0
            }
        );
    }

    #[test]
    fn suboptimal_acquire_still_submits_then_recreates() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        gpu.acquire_script.push_back(Acquired::Image {
            index: 1,
            suboptimal: true,
        });

        let outcome = orch.draw_frame(&mut gpu, SIZE).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(gpu.count(|s| matches!(s, Step::Submit(0))), 1);
        assert_eq!(gpu.count(|s| matches!(s, Step::Present(0, 1))), 1);
        assert_eq!(gpu.count(|s| matches!(s, Step::Recreate(_))), 1);
    }

    #[test]
    fn resize_flag_is_consumed_at_present() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        let flag = orch.resize_flag();
        flag.raise();

        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Recreated
        );
        assert!(!flag.is_raised());
        assert!(matches!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }

    #[test]
    fn resize_between_frames_rebuilds_chain_at_new_extent() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        let flag = orch.resize_flag();

        orch.draw_frame(&mut gpu, SIZE).unwrap();
        assert_eq!(orch.current_frame(), 1);

        let small = RenderSize::new(400, 300);
        flag.raise();
        assert_eq!(
            orch.draw_frame(&mut gpu, small).unwrap(),
            FrameOutcome::Recreated
        );

        let chain = gpu.chain();
        assert_eq!(chain.extent, small);
        assert_eq!(chain.framebuffers, chain.images);
        assert_eq!(gpu.destroyed, vec![0]);
        assert_eq!(orch.current_frame(), 1);

        let outcome = orch.draw_frame(&mut gpu, small).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 1,
                image_index: 0
            }
        );
        assert!(matches!(
            gpu.steps.iter().rev().find(|s| matches!(s, Step::Record { .. })),
            Some(Step::Record { chain: 1, .. })
        ));
    }

    #[test]
    fn repeated_recreation_leaves_a_presentable_chain() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        for _ in 0..5 {
            gpu.acquire_script.push_back(Acquired::OutOfDate);
        }

        for _ in 0..5 {
            assert_eq!(
                orch.draw_frame(&mut gpu, SIZE).unwrap(),
                FrameOutcome::Recreated
            );
        }

        assert_eq!(orch.recreations(), 5);
        assert_eq!(gpu.destroyed, vec![0, 1, 2, 3, 4]);
        assert_eq!(gpu.chain().id, 5);
        assert!(matches!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Presented { slot: 0, .. }
        ));
    }

    #[test]
    fn empty_framebuffer_skips_and_keeps_resize_pending() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        let flag = orch.resize_flag();
        flag.raise();

        assert_eq!(
            orch.draw_frame(&mut gpu, RenderSize::new(0, 0)).unwrap(),
            FrameOutcome::Skipped
        );
        assert!(gpu.steps.is_empty());
        assert!(flag.is_raised());

        let restored = RenderSize::new(640, 480);
        assert_eq!(
            orch.draw_frame(&mut gpu, restored).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(gpu.chain().extent, restored);
    }

    #[test]
    fn minimised_surface_defers_rebuild_until_it_has_area() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        // The window still reports its old size, the surface already reports 0x0.
        gpu.surface = Some(RenderSize::new(0, 0));
        gpu.acquire_script.push_back(Acquired::OutOfDate);

        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Skipped
        );
        assert!(!gpu.chain_ready());
        assert_eq!(gpu.destroyed, vec![0]);
        assert_eq!(orch.recreations(), 0);
        assert_eq!(orch.current_frame(), 0);

        // Still minimised: no slot work against the missing chain.
        let before = gpu.steps.len();
        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(gpu.steps[before..], [Step::Deferred]);

        gpu.surface = None;
        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(orch.recreations(), 1);
        assert_eq!(gpu.chain().extent, SIZE);
        assert!(matches!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Presented { slot: 0, .. }
        ));
    }

    #[test]
    fn deferred_rebuild_keeps_resize_pending() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        let flag = orch.resize_flag();
        flag.raise();
        gpu.surface = Some(RenderSize::new(0, 0));

        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(gpu.count(|s| matches!(s, Step::Present(..))), 1);
        assert!(flag.is_raised());
        assert!(!gpu.chain_ready());

        gpu.surface = None;
        let restored = RenderSize::new(640, 480);
        assert_eq!(
            orch.draw_frame(&mut gpu, restored).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(gpu.chain().extent, restored);
        // The pending flag is consumed at the next present.
        assert_eq!(
            orch.draw_frame(&mut gpu, restored).unwrap(),
            FrameOutcome::Recreated
        );
        assert!(!flag.is_raised());
        assert!(matches!(
            orch.draw_frame(&mut gpu, restored).unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }

    #[test]
    fn startup_without_surface_area_builds_chain_on_first_frame() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        gpu.chain = None;

        assert_eq!(
            orch.draw_frame(&mut gpu, SIZE).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(gpu.steps, vec![Step::Recreate(SIZE)]);
        assert!(gpu.destroyed.is_empty());
    }

    #[test]
    fn submit_failure_is_fatal_and_does_not_advance() {
        let mut orch = FrameOrchestrator::new(2);
        let mut gpu = FakeBackend::new(2, SIZE);
        gpu.fail_submit = true;

        let err = orch.draw_frame(&mut gpu, SIZE).unwrap_err();

        assert!(matches!(err, FrameError::FrameSubmitFailed(_)));
        assert_eq!(orch.current_frame(), 0);
        assert_eq!(gpu.count(|s| matches!(s, Step::Present(..))), 0);
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        assert_eq!(FrameOrchestrator::new(0).frames_in_flight(), 1);
        assert_eq!(
            FrameOrchestrator::new(64).frames_in_flight(),
            MAX_FRAMES_IN_FLIGHT
        );
        assert_eq!(FrameOrchestrator::new(3).frames_in_flight(), 3);
    }

    #[test]
    fn resize_flag_is_shared_across_threads() {
        let flag = ResizeFlag::new();
        let remote = flag.clone();
        std::thread::spawn(move || remote.raise()).join().unwrap();
        assert!(flag.take());
        assert!(!flag.take());
    }
}
