//! Mode selection and visible-sensor lifecycle.
//!
//! The controller owns at most one visible-camera worker at a time and
//! swaps it on switch transitions. An incoming sensor is opened before
//! the outgoing one is released, so a failed open leaves the previous
//! mode fully usable.

use crate::capture::{CaptureWorker, FrameSlots, SensorBackend};
use crate::config::Tuning;
use binox_core::compose::{Mode, SensorKind, SwitchMap};
use binox_hw::camera::CameraError;
use std::time::{Duration, Instant};

pub struct ModeController<B: SensorBackend> {
    backend: B,
    slots: FrameSlots,
    map: SwitchMap,
    mode: Mode,
    /// Last mapped switch position seen; 0 until the first read.
    position: u8,
    zoom: f32,
    zoom_min: f32,
    zoom_max: f32,
    zoom_step: f32,
    open_retries: u32,
    open_retry_delay: Duration,
    revive_backoff: Duration,
    /// Worker for the current mode's visible sensor; `None` in thermal
    /// mode, or after a dead worker was released.
    worker: Option<B::Worker>,
    last_revive: Option<Instant>,
}

impl<B: SensorBackend> ModeController<B> {
    /// Start in visible-A mode. Fails fast when the primary camera
    /// cannot be opened at all.
    pub fn start(backend: B, slots: FrameSlots, tuning: &Tuning) -> Result<Self, CameraError> {
        let mut controller = Self {
            backend,
            slots,
            map: tuning.switch_map.clone(),
            mode: Mode::VisibleA,
            position: 0,
            zoom: tuning.zoom_min,
            zoom_min: tuning.zoom_min,
            zoom_max: tuning.zoom_max,
            zoom_step: tuning.zoom_step,
            open_retries: tuning.open_retries,
            open_retry_delay: tuning.open_retry_delay,
            revive_backoff: tuning.revive_backoff,
            worker: None,
            last_revive: None,
        };
        let worker = controller.open_with_retries(SensorKind::VisibleStandard)?;
        controller.worker = Some(worker);
        Ok(controller)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Handle a switch reading. Repeats and unmapped positions are
    /// ignored; returns the new mode when a transition happened.
    pub fn handle_switch(&mut self, position: u8) -> Option<Mode> {
        if position == self.position {
            return None;
        }
        let Some(target) = self.map.mode_for(position) else {
            tracing::debug!(position, "switch position has no mapping");
            self.position = position;
            return None;
        };
        if target == self.mode {
            self.position = position;
            return None;
        }
        match self.transition(target) {
            Ok(()) => {
                self.position = position;
                tracing::info!(mode = ?target, position, "mode changed");
                Some(target)
            }
            Err(e) => {
                tracing::error!(error = %e, mode = ?target, "mode change failed; keeping current mode");
                // A failed target is not retried until the switch moves again.
                self.position = position;
                None
            }
        }
    }

    fn transition(&mut self, target: Mode) -> Result<(), CameraError> {
        let current_kind = self.mode.visible_kind();
        let target_kind = target.visible_kind();

        if target_kind != current_kind {
            let incoming = match target_kind {
                Some(kind) => Some(self.open_with_retries(kind)?),
                None => None,
            };
            if let Some(old) = std::mem::replace(&mut self.worker, incoming) {
                let kind = old.kind();
                old.stop();
                self.slots.for_kind(kind).clear();
            }
        }
        self.mode = target;
        Ok(())
    }

    fn open_with_retries(&self, kind: SensorKind) -> Result<B::Worker, CameraError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .backend
                .spawn_visible(kind, self.slots.for_kind(kind).clone(), self.zoom)
            {
                Ok(worker) => return Ok(worker),
                Err(e) if attempt < self.open_retries => {
                    tracing::warn!(error = %e, sensor = ?kind, attempt, "sensor open failed; retrying");
                    std::thread::sleep(self.open_retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply encoder detents to the zoom factor. The value persists
    /// across mode changes and is pushed to whichever visible worker is
    /// running. Returns the new factor when it changed.
    pub fn handle_zoom(&mut self, detents: i32) -> Option<f32> {
        if detents == 0 {
            return None;
        }
        let target =
            (self.zoom + detents as f32 * self.zoom_step).clamp(self.zoom_min, self.zoom_max);
        if (target - self.zoom).abs() < f32::EPSILON {
            return None;
        }
        self.zoom = target;
        if let Some(worker) = &self.worker {
            worker.set_zoom(target);
        }
        tracing::debug!(zoom = target, "zoom changed");
        Some(target)
    }

    /// Snap back to 1x.
    pub fn reset_zoom(&mut self) -> f32 {
        self.zoom = self.zoom_min;
        if let Some(worker) = &self.worker {
            worker.set_zoom(self.zoom);
        }
        tracing::info!("zoom reset");
        self.zoom
    }

    /// Revive the visible sensor if its worker died, at most once per
    /// backoff period. The dead worker is released before the reopen so
    /// the device node is free.
    pub fn maintain(&mut self) {
        let Some(kind) = self.mode.visible_kind() else {
            return;
        };
        let needs_revival = match &self.worker {
            Some(worker) => worker.is_dead(),
            None => true,
        };
        if !needs_revival {
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.last_revive {
            if now.duration_since(last) < self.revive_backoff {
                return;
            }
        }
        self.last_revive = Some(now);

        if let Some(worker) = self.worker.take() {
            tracing::warn!(sensor = ?kind, "capture worker died; attempting revival");
            worker.stop();
            self.slots.for_kind(kind).clear();
        }
        match self
            .backend
            .spawn_visible(kind, self.slots.for_kind(kind).clone(), self.zoom)
        {
            Ok(worker) => {
                tracing::info!(sensor = ?kind, "capture worker revived");
                self.worker = Some(worker);
            }
            Err(e) => {
                tracing::error!(sensor = ?kind, error = %e, "revival failed; will retry");
            }
        }
    }

    pub fn shutdown(self) {
        if let Some(worker) = self.worker {
            let kind = worker.kind();
            worker.stop();
            self.slots.for_kind(kind).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSlot;
    use binox_core::Frame;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Spawn(SensorKind, f32),
        Zoom(SensorKind, f32),
        Stop(SensorKind),
    }

    #[derive(Default)]
    struct MockState {
        events: Vec<Event>,
        /// Number of upcoming spawns that should fail.
        fail_next: u32,
        live: i32,
        last_dead: Option<Arc<AtomicBool>>,
    }

    #[derive(Clone, Default)]
    struct MockBackend {
        state: Rc<RefCell<MockState>>,
    }

    struct MockWorker {
        kind: SensorKind,
        dead: Arc<AtomicBool>,
        state: Rc<RefCell<MockState>>,
    }

    impl CaptureWorker for MockWorker {
        fn kind(&self) -> SensorKind {
            self.kind
        }

        fn set_zoom(&self, factor: f32) {
            self.state
                .borrow_mut()
                .events
                .push(Event::Zoom(self.kind, factor));
        }

        fn is_dead(&self) -> bool {
            self.dead.load(Ordering::Relaxed)
        }

        fn stop(self) {}
    }

    impl Drop for MockWorker {
        fn drop(&mut self) {
            let mut state = self.state.borrow_mut();
            state.events.push(Event::Stop(self.kind));
            state.live -= 1;
        }
    }

    impl SensorBackend for MockBackend {
        type Worker = MockWorker;

        fn spawn_visible(
            &self,
            kind: SensorKind,
            _slot: FrameSlot,
            zoom: f32,
        ) -> Result<MockWorker, CameraError> {
            let mut state = self.state.borrow_mut();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(CameraError::DeviceBusy);
            }
            let dead = Arc::new(AtomicBool::new(false));
            state.events.push(Event::Spawn(kind, zoom));
            state.live += 1;
            state.last_dead = Some(Arc::clone(&dead));
            Ok(MockWorker {
                kind,
                dead,
                state: Rc::clone(&self.state),
            })
        }
    }

    fn test_tuning() -> Tuning {
        Tuning {
            open_retry_delay: Duration::ZERO,
            revive_backoff: Duration::ZERO,
            ..Tuning::default()
        }
    }

    fn controller(backend: &MockBackend) -> ModeController<MockBackend> {
        ModeController::start(backend.clone(), FrameSlots::default(), &test_tuning()).unwrap()
    }

    #[test]
    fn test_startup_runs_visible_a() {
        let backend = MockBackend::default();
        let ctl = controller(&backend);
        assert_eq!(ctl.mode(), Mode::VisibleA);
        assert_eq!(
            backend.state.borrow().events,
            vec![Event::Spawn(SensorKind::VisibleStandard, 1.0)]
        );
    }

    #[test]
    fn test_switch_through_thermal_to_overlay() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        // Position 1 maps to the mode already running: no transition.
        assert_eq!(ctl.handle_switch(1), None);

        // Position 3: thermal-only. The visible camera is released.
        assert_eq!(ctl.handle_switch(3), Some(Mode::Thermal));
        {
            let state = backend.state.borrow();
            assert_eq!(state.live, 0, "thermal mode needs no visible worker");
            assert!(state.events.contains(&Event::Stop(SensorKind::VisibleStandard)));
        }

        // Position 4: overlay-A reopens the standard camera.
        assert_eq!(ctl.handle_switch(4), Some(Mode::OverlayA));
        let state = backend.state.borrow();
        assert_eq!(state.live, 1);
        assert_eq!(
            state.events.last(),
            Some(&Event::Spawn(SensorKind::VisibleStandard, 1.0))
        );
    }

    #[test]
    fn test_visible_to_matching_overlay_keeps_camera() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        assert_eq!(ctl.handle_switch(4), Some(Mode::OverlayA));
        let state = backend.state.borrow();
        assert_eq!(
            state.events,
            vec![Event::Spawn(SensorKind::VisibleStandard, 1.0)],
            "switching 1 to 4 must not restart the running camera"
        );
    }

    #[test]
    fn test_camera_swap_opens_new_before_closing_old() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        assert_eq!(ctl.handle_switch(2), Some(Mode::VisibleB));
        let state = backend.state.borrow();
        assert_eq!(
            state.events,
            vec![
                Event::Spawn(SensorKind::VisibleStandard, 1.0),
                Event::Spawn(SensorKind::VisibleNoir, 1.0),
                Event::Stop(SensorKind::VisibleStandard),
            ]
        );
    }

    #[test]
    fn test_failed_transition_keeps_current_mode() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);
        backend.state.borrow_mut().fail_next = 3; // all retries fail

        assert_eq!(ctl.handle_switch(2), None);
        assert_eq!(ctl.mode(), Mode::VisibleA);
        let state = backend.state.borrow();
        assert_eq!(state.live, 1, "the original camera must keep running");
        assert!(!state.events.contains(&Event::Stop(SensorKind::VisibleStandard)));
    }

    #[test]
    fn test_transition_retries_before_giving_up() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);
        backend.state.borrow_mut().fail_next = 2; // third attempt succeeds

        assert_eq!(ctl.handle_switch(2), Some(Mode::VisibleB));
    }

    #[test]
    fn test_unmapped_position_is_ignored() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        assert_eq!(ctl.handle_switch(7), None);
        assert_eq!(ctl.mode(), Mode::VisibleA);
        assert_eq!(backend.state.borrow().live, 1);
    }

    #[test]
    fn test_switching_to_thermal_clears_visible_slot() {
        let backend = MockBackend::default();
        let slots = FrameSlots::default();
        let mut ctl =
            ModeController::start(backend.clone(), slots.clone(), &test_tuning()).unwrap();

        slots.visible_a.publish(Frame::new(RgbImage::new(2, 2), 1));
        ctl.handle_switch(3);
        assert!(
            slots.visible_a.latest().is_none(),
            "a released sensor's last frame must not linger"
        );
    }

    #[test]
    fn test_zoom_accumulates_and_clamps() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        // Ten detents at 0.1 per detent.
        let z = ctl.handle_zoom(10).unwrap();
        assert!((z - 2.0).abs() < 1e-6, "expected 2.0, got {z}");
        assert_eq!(ctl.handle_zoom(0), None);

        assert_eq!(ctl.handle_zoom(1000), Some(8.0));
        assert_eq!(ctl.handle_zoom(5), None, "already at the upper bound");
        assert_eq!(ctl.handle_zoom(-1000), Some(1.0));
    }

    #[test]
    fn test_zoom_persists_across_mode_change() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        ctl.handle_zoom(10);
        ctl.handle_switch(2);

        let state = backend.state.borrow();
        let spawned_zoom = state
            .events
            .iter()
            .find_map(|e| match e {
                Event::Spawn(SensorKind::VisibleNoir, z) => Some(*z),
                _ => None,
            })
            .unwrap();
        assert!(
            (spawned_zoom - 2.0).abs() < 1e-6,
            "the new camera must open with the persisted zoom, got {spawned_zoom}"
        );
    }

    #[test]
    fn test_reset_zoom_returns_to_unity() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        ctl.handle_zoom(10);
        assert_eq!(ctl.reset_zoom(), 1.0);
        assert!(backend
            .state
            .borrow()
            .events
            .contains(&Event::Zoom(SensorKind::VisibleStandard, 1.0)));
    }

    #[test]
    fn test_zoom_survives_thermal_mode() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        ctl.handle_switch(3);
        // No worker to notify, but the value still accumulates.
        let z = ctl.handle_zoom(5).unwrap();
        assert!((z - 1.5).abs() < 1e-6);
        ctl.handle_switch(1);

        let state = backend.state.borrow();
        match state.events.last() {
            Some(Event::Spawn(SensorKind::VisibleStandard, reopened)) => {
                assert!((reopened - 1.5).abs() < 1e-6)
            }
            other => panic!("expected a standard-camera spawn, got {other:?}"),
        }
    }

    #[test]
    fn test_dead_worker_is_revived() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        // Healthy worker: maintain is a no-op.
        ctl.maintain();
        assert_eq!(backend.state.borrow().events.len(), 1);

        backend
            .state
            .borrow()
            .last_dead
            .as_ref()
            .unwrap()
            .store(true, Ordering::Relaxed);
        ctl.maintain();

        let state = backend.state.borrow();
        assert_eq!(
            state.events[1..],
            [
                Event::Stop(SensorKind::VisibleStandard),
                Event::Spawn(SensorKind::VisibleStandard, 1.0),
            ]
        );
        assert_eq!(state.live, 1);
    }

    #[test]
    fn test_failed_revival_retries_later() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        backend
            .state
            .borrow()
            .last_dead
            .as_ref()
            .unwrap()
            .store(true, Ordering::Relaxed);
        backend.state.borrow_mut().fail_next = 1;

        ctl.maintain();
        assert_eq!(backend.state.borrow().live, 0, "dead worker released");

        // Zero backoff in tests: the next maintain call tries again.
        ctl.maintain();
        let state = backend.state.borrow();
        assert_eq!(state.live, 1);
        assert_eq!(
            state.events.last(),
            Some(&Event::Spawn(SensorKind::VisibleStandard, 1.0))
        );
    }

    #[test]
    fn test_thermal_mode_needs_no_maintenance() {
        let backend = MockBackend::default();
        let mut ctl = controller(&backend);

        ctl.handle_switch(3);
        let before = backend.state.borrow().events.len();
        ctl.maintain();
        assert_eq!(backend.state.borrow().events.len(), before);
    }

    #[test]
    fn test_shutdown_releases_worker() {
        let backend = MockBackend::default();
        let ctl = controller(&backend);
        ctl.shutdown();
        assert_eq!(backend.state.borrow().live, 0);
    }
}
