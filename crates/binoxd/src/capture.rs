//! Capture workers and the frame slots they publish into.
//!
//! Each running sensor gets a dedicated OS thread that owns the device
//! and pushes decoded frames into its slot. The render loop only ever
//! reads slots; it never blocks on a sensor.

use binox_core::compose::SensorKind;
use binox_core::thermal::ThermalProcessor;
use binox_core::Frame;
use binox_hw::camera::{CameraError, VisibleCamera};
use binox_hw::profile::{HardwareProfile, ThermalSensorInfo};
use binox_hw::thermal::ThermalSensor;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Latest-frame mailbox shared between one capture worker and the
/// render loop. The writer replaces, readers clone the Arc; a slow
/// reader never stalls capture.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl FrameSlot {
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(frame));
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// One slot per sensor position.
#[derive(Clone, Default)]
pub struct FrameSlots {
    pub visible_a: FrameSlot,
    pub visible_b: FrameSlot,
    pub thermal: FrameSlot,
}

impl FrameSlots {
    pub fn for_kind(&self, kind: SensorKind) -> &FrameSlot {
        match kind {
            SensorKind::VisibleStandard => &self.visible_a,
            SensorKind::VisibleNoir => &self.visible_b,
            SensorKind::Thermal => &self.thermal,
        }
    }
}

/// Commands accepted by a visible-camera worker.
enum WorkerCommand {
    SetZoom(f32),
    Stop,
}

/// Handle to a running capture worker, as seen by the mode controller.
pub trait CaptureWorker {
    fn kind(&self) -> SensorKind;
    /// Forward a zoom change to the device. Never blocks.
    fn set_zoom(&self, factor: f32);
    /// True once the worker has given up on its device.
    fn is_dead(&self) -> bool;
    /// Stop the worker and release the device.
    fn stop(self);
}

/// Hardware seam for the mode controller: opening a visible sensor and
/// spawning its capture worker.
pub trait SensorBackend {
    type Worker: CaptureWorker;

    fn spawn_visible(
        &self,
        kind: SensorKind,
        slot: FrameSlot,
        zoom: f32,
    ) -> Result<Self::Worker, CameraError>;
}

/// Production worker handle over a V4L2 capture thread.
pub struct VisibleWorker {
    kind: SensorKind,
    commands: Sender<WorkerCommand>,
    dead: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VisibleWorker {
    fn shutdown(&mut self) {
        let _ = self.commands.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureWorker for VisibleWorker {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn set_zoom(&self, factor: f32) {
        let _ = self.commands.send(WorkerCommand::SetZoom(factor));
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    fn stop(mut self) {
        self.shutdown();
    }
}

impl Drop for VisibleWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Backend driving real V4L2 devices per the hardware profile.
pub struct V4lBackend {
    profile: HardwareProfile,
    stream_width: u32,
    stream_height: u32,
    failure_limit: u32,
}

impl V4lBackend {
    pub fn new(
        profile: HardwareProfile,
        stream_width: u32,
        stream_height: u32,
        failure_limit: u32,
    ) -> Self {
        Self {
            profile,
            stream_width,
            stream_height,
            failure_limit,
        }
    }
}

impl SensorBackend for V4lBackend {
    type Worker = VisibleWorker;

    fn spawn_visible(
        &self,
        kind: SensorKind,
        slot: FrameSlot,
        zoom: f32,
    ) -> Result<VisibleWorker, CameraError> {
        let (info, tag) = match kind {
            SensorKind::VisibleStandard => (&self.profile.visible_a, "a"),
            SensorKind::VisibleNoir => (&self.profile.visible_b, "b"),
            SensorKind::Thermal => {
                return Err(CameraError::DeviceNotFound(
                    "no visible camera at the thermal position".to_string(),
                ))
            }
        };

        let camera = VisibleCamera::open(
            &info.device,
            self.stream_width,
            self.stream_height,
            info.sensor_width,
            info.sensor_height,
        )?;
        if zoom > 1.0 {
            // A failed crop leaves the camera usable at 1x.
            if let Err(e) = camera.set_zoom(zoom) {
                tracing::warn!(device = %info.device, error = %e, "initial zoom failed");
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let dead = Arc::new(AtomicBool::new(false));
        let worker_dead = Arc::clone(&dead);
        let failure_limit = self.failure_limit;

        let handle = std::thread::Builder::new()
            .name(format!("binox-cam-{tag}"))
            .spawn(move || run_visible_worker(camera, slot, rx, worker_dead, failure_limit))
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn worker: {e}")))?;

        Ok(VisibleWorker {
            kind,
            commands: tx,
            dead,
            handle: Some(handle),
        })
    }
}

fn run_visible_worker(
    camera: VisibleCamera,
    slot: FrameSlot,
    commands: Receiver<WorkerCommand>,
    dead: Arc<AtomicBool>,
    failure_limit: u32,
) {
    tracing::info!(device = %camera.device_path, "capture worker started");

    let mut stream = match camera.start() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(device = %camera.device_path, error = %e, "failed to start stream");
            dead.store(true, Ordering::Relaxed);
            return;
        }
    };

    let mut consecutive_failures = 0u32;
    loop {
        // Drain pending commands between captures.
        loop {
            match commands.try_recv() {
                Ok(WorkerCommand::SetZoom(factor)) => {
                    if let Err(e) = camera.set_zoom(factor) {
                        tracing::warn!(device = %camera.device_path, error = %e, "zoom change failed");
                    }
                }
                Ok(WorkerCommand::Stop) => {
                    tracing::info!(device = %camera.device_path, "capture worker stopping");
                    return;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match stream.read_frame() {
            Ok(frame) => {
                consecutive_failures = 0;
                slot.publish(frame);
            }
            Err(e) if e.is_transient() => {
                consecutive_failures += 1;
                if consecutive_failures >= failure_limit {
                    tracing::error!(
                        device = %camera.device_path,
                        failures = consecutive_failures,
                        "giving up on camera"
                    );
                    dead.store(true, Ordering::Relaxed);
                    return;
                }
                tracing::warn!(
                    device = %camera.device_path,
                    error = %e,
                    failures = consecutive_failures,
                    "capture failed"
                );
            }
            Err(e) => {
                tracing::error!(device = %camera.device_path, error = %e, "fatal capture error");
                dead.store(true, Ordering::Relaxed);
                return;
            }
        }
    }
}

/// Spawn the thermal capture worker.
///
/// It owns the sensor for the life of the daemon, publishing processed
/// frames at the sensor's own rate and reacquiring the device with
/// backoff after failures. Heavy processing happens here, off the
/// render thread.
pub fn spawn_thermal(
    profile: &HardwareProfile,
    processor: ThermalProcessor,
    slot: FrameSlot,
    shutdown: Arc<AtomicBool>,
    failure_limit: u32,
    revive_backoff: Duration,
) -> std::io::Result<JoinHandle<()>> {
    let info = profile.thermal.clone();
    std::thread::Builder::new()
        .name("binox-thermal".into())
        .spawn(move || {
            run_thermal_worker(&info, &processor, &slot, &shutdown, failure_limit, revive_backoff)
        })
}

fn run_thermal_worker(
    info: &ThermalSensorInfo,
    processor: &ThermalProcessor,
    slot: &FrameSlot,
    shutdown: &AtomicBool,
    failure_limit: u32,
    revive_backoff: Duration,
) {
    let device = info.device.as_str();
    let mut sequence = 0u32;
    while !shutdown.load(Ordering::Relaxed) {
        let sensor = match ThermalSensor::open(device, info.cols, info.rows) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(device, error = %e, "thermal sensor unavailable; retrying");
                sleep_unless_shutdown(shutdown, revive_backoff);
                continue;
            }
        };
        let mut stream = match sensor.start() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(device, error = %e, "thermal stream failed to start");
                sleep_unless_shutdown(shutdown, revive_backoff);
                continue;
            }
        };

        let mut consecutive_failures = 0u32;
        while !shutdown.load(Ordering::Relaxed) {
            match stream.read_raw() {
                Ok(raw) => match processor.process(&raw) {
                    Ok(pixels) => {
                        consecutive_failures = 0;
                        sequence = sequence.wrapping_add(1);
                        slot.publish(Frame::new(pixels, sequence));
                    }
                    Err(e) => {
                        tracing::warn!(device, error = %e, "thermal grid rejected");
                        consecutive_failures += 1;
                        if consecutive_failures >= failure_limit {
                            break;
                        }
                    }
                },
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= failure_limit {
                        tracing::error!(
                            device,
                            failures = consecutive_failures,
                            "thermal sensor wedged; reopening"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(device, error = %e, "thermal sensor lost");
                    break;
                }
            }
        }

        // Stale imagery must not survive a sensor loss.
        slot.clear();
        if !shutdown.load(Ordering::Relaxed) {
            sleep_unless_shutdown(shutdown, revive_backoff);
        }
    }
    tracing::info!("thermal worker stopped");
}

/// Sleep in short slices so shutdown stays responsive.
fn sleep_unless_shutdown(shutdown: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(50);
    let mut remaining = total;
    while !shutdown.load(Ordering::Relaxed) && remaining > Duration::ZERO {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(seq: u32) -> Frame {
        Frame::new(RgbImage::new(2, 2), seq)
    }

    #[test]
    fn test_slot_starts_empty() {
        let slot = FrameSlot::default();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_publish_replaces_previous_frame() {
        let slot = FrameSlot::default();
        slot.publish(frame(1));
        slot.publish(frame(2));
        assert_eq!(slot.latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_clear_empties_slot() {
        let slot = FrameSlot::default();
        slot.publish(frame(1));
        slot.clear();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let writer = FrameSlot::default();
        let reader = writer.clone();
        writer.publish(frame(7));
        assert_eq!(reader.latest().unwrap().sequence, 7);
    }

    #[test]
    fn test_reader_keeps_frame_after_replacement() {
        let slot = FrameSlot::default();
        slot.publish(frame(1));
        let held = slot.latest().unwrap();
        slot.publish(frame(2));
        assert_eq!(held.sequence, 1, "a held Arc must not be mutated by publish");
        assert_eq!(slot.latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_slots_route_by_kind() {
        let slots = FrameSlots::default();
        slots.for_kind(SensorKind::VisibleNoir).publish(frame(3));
        assert!(slots.visible_a.latest().is_none());
        assert_eq!(slots.visible_b.latest().unwrap().sequence, 3);
        assert!(slots.thermal.latest().is_none());
    }
}
