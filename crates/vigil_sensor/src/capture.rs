//! Event capture pipeline: motion in, published-ready events out.
//!
//! Hardware sits behind the [`MotionSensor`] and [`Camera`] seams so the
//! pipeline logic is the same on a bench as on a device. One continuous
//! motion episode produces one event: after publishing, detections are
//! suppressed until motion has cleared and a settle delay has passed.

use crate::SensorError;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use vigil_protocol::SecurityEvent;

/// Motion source. `motion_detected` is a cheap, non-blocking level read.
pub trait MotionSensor: Send {
    fn motion_detected(&mut self) -> bool;
}

/// Still-image source. May block briefly; captures are not cancelled.
pub trait Camera: Send {
    fn capture_still(&mut self) -> Result<Vec<u8>, SensorError>;
}

/// Motion sensor driven by the presence of a trigger file.
///
/// Stands in for a GPIO line on hardware that has none; `touch` the path
/// to raise motion, remove it to clear.
pub struct FileTriggerSensor {
    path: PathBuf,
}

impl FileTriggerSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MotionSensor for FileTriggerSensor {
    fn motion_detected(&mut self) -> bool {
        self.path.exists()
    }
}

/// Minimal JPEG skeleton served when no capture command is configured.
const PLACEHOLDER_JPEG: &[u8] = &[
    0xFF, 0xD8, // SOI
    0xFF, 0xFE, 0x00, 0x13, // COM, length 19
    b'v', b'i', b'g', b'i', b'l', b' ', b'p', b'l', b'a', b'c', b'e', b'h', b'o', b'l', b'd',
    b'e', b'r', 0xFF, 0xD9, // EOI
];

/// Camera that returns a fixed placeholder frame.
pub struct StaticCamera;

impl Camera for StaticCamera {
    fn capture_still(&mut self) -> Result<Vec<u8>, SensorError> {
        Ok(PLACEHOLDER_JPEG.to_vec())
    }
}

/// Camera that shells out to a still-capture command, then reads the file
/// the command wrote.
///
/// The command string is whitespace-split (no shell); the output path is
/// appended as the final argument, e.g. `raspistill -w 320 -h 240 -o`.
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
    output: PathBuf,
}

impl CommandCamera {
    pub fn new(command: &str, output: impl Into<PathBuf>) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?.to_string();
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
            output: output.into(),
        })
    }
}

impl Camera for CommandCamera {
    fn capture_still(&mut self) -> Result<Vec<u8>, SensorError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.output)
            .status()
            .map_err(|e| SensorError::Capture(format!("{}: {}", self.program, e)))?;

        if !status.success() {
            return Err(SensorError::Capture(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        std::fs::read(&self.output)
            .map_err(|e| SensorError::Capture(format!("reading {}: {}", self.output.display(), e)))
    }
}

/// Where the pipeline is in its suppress/settle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettlePhase {
    /// Armed: next motion fires an event.
    Ready,
    /// An event fired; waiting for motion to clear.
    AwaitClear,
    /// Motion cleared; suppressed until the settle deadline.
    Settling { until: Instant },
}

/// The capture pipeline. Driven by the sensor loop, one `observe` per
/// polling cycle while the sensor is in SENSING.
pub struct CapturePipeline {
    sensor_id: String,
    motion: Box<dyn MotionSensor>,
    camera: Box<dyn Camera>,
    settle: Duration,
    phase: SettlePhase,
}

impl CapturePipeline {
    pub fn new(
        sensor_id: impl Into<String>,
        motion: Box<dyn MotionSensor>,
        camera: Box<dyn Camera>,
        settle: Duration,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            motion,
            camera,
            settle,
            phase: SettlePhase::Ready,
        }
    }

    /// One polling-cycle step: read motion, maybe capture and assemble an
    /// event for the caller to publish.
    ///
    /// A capture failure leaves the pipeline armed so the next motion
    /// reading retries.
    pub fn observe(&mut self) -> Result<Option<SecurityEvent>, SensorError> {
        let motion = self.motion.motion_detected();

        match self.phase {
            SettlePhase::Ready => {
                if !motion {
                    return Ok(None);
                }
                info!("Motion detected");
                let image = self.camera.capture_still()?;
                let event = SecurityEvent::new(&self.sensor_id, &image);
                self.phase = SettlePhase::AwaitClear;
                Ok(Some(event))
            }
            SettlePhase::AwaitClear => {
                if !motion {
                    debug!("Motion cleared, settling");
                    self.phase = SettlePhase::Settling {
                        until: Instant::now() + self.settle,
                    };
                }
                Ok(None)
            }
            SettlePhase::Settling { until } => {
                if Instant::now() >= until {
                    self.phase = SettlePhase::Ready;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Motion script: pops one reading per observe, false once exhausted.
    struct ScriptedMotion {
        readings: VecDeque<bool>,
    }

    impl ScriptedMotion {
        fn new(readings: &[bool]) -> Box<Self> {
            Box::new(Self {
                readings: readings.iter().copied().collect(),
            })
        }
    }

    impl MotionSensor for ScriptedMotion {
        fn motion_detected(&mut self) -> bool {
            self.readings.pop_front().unwrap_or(false)
        }
    }

    struct CountingCamera {
        captures: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Camera for CountingCamera {
        fn capture_still(&mut self) -> Result<Vec<u8>, SensorError> {
            self.captures
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(b"frame".to_vec())
        }
    }

    fn counting_camera() -> (Box<CountingCamera>, std::sync::Arc<std::sync::atomic::AtomicUsize>)
    {
        let captures = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        (
            Box::new(CountingCamera {
                captures: captures.clone(),
            }),
            captures,
        )
    }

    #[test]
    fn test_motion_produces_one_event() {
        let (camera, captures) = counting_camera();
        let mut pipeline = CapturePipeline::new(
            "s1",
            ScriptedMotion::new(&[false, true]),
            camera,
            Duration::ZERO,
        );

        assert!(pipeline.observe().unwrap().is_none());
        let event = pipeline.observe().unwrap().expect("event on motion");
        assert_eq!(event.sensor, "s1");
        assert_eq!(event.image_bytes().unwrap(), b"frame");
        assert_eq!(captures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_continuous_motion_is_one_episode() {
        let (camera, captures) = counting_camera();
        let mut pipeline = CapturePipeline::new(
            "s1",
            ScriptedMotion::new(&[true, true, true, true]),
            camera,
            Duration::ZERO,
        );

        let mut events = 0;
        for _ in 0..4 {
            if pipeline.observe().unwrap().is_some() {
                events += 1;
            }
        }
        assert_eq!(events, 1);
        assert_eq!(captures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rearm_after_clear_and_settle() {
        let (camera, _) = counting_camera();
        // fire, still moving, clear, settle tick, fire again
        let mut pipeline = CapturePipeline::new(
            "s1",
            ScriptedMotion::new(&[true, true, false, false, true]),
            camera,
            Duration::ZERO,
        );

        assert!(pipeline.observe().unwrap().is_some()); // fire
        assert!(pipeline.observe().unwrap().is_none()); // await clear
        assert!(pipeline.observe().unwrap().is_none()); // cleared, settling
        assert!(pipeline.observe().unwrap().is_none()); // settle expired, re-armed
        assert!(pipeline.observe().unwrap().is_some()); // fire again
    }

    #[test]
    fn test_settle_window_suppresses_new_motion() {
        let (camera, captures) = counting_camera();
        let mut pipeline = CapturePipeline::new(
            "s1",
            ScriptedMotion::new(&[true, false, true, true]),
            camera,
            Duration::from_millis(80),
        );

        assert!(pipeline.observe().unwrap().is_some()); // fire
        assert!(pipeline.observe().unwrap().is_none()); // cleared, settling
        assert!(pipeline.observe().unwrap().is_none()); // suppressed
        std::thread::sleep(Duration::from_millis(100));
        assert!(pipeline.observe().unwrap().is_none()); // settle expired, re-armed
        assert_eq!(captures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_failure_keeps_pipeline_armed() {
        struct FailingOnce {
            failed: bool,
        }
        impl Camera for FailingOnce {
            fn capture_still(&mut self) -> Result<Vec<u8>, SensorError> {
                if self.failed {
                    Ok(b"frame".to_vec())
                } else {
                    self.failed = true;
                    Err(SensorError::Capture("lens cap on".into()))
                }
            }
        }

        let mut pipeline = CapturePipeline::new(
            "s1",
            ScriptedMotion::new(&[true, true]),
            Box::new(FailingOnce { failed: false }),
            Duration::ZERO,
        );

        assert!(pipeline.observe().is_err());
        // Still armed: the next motion reading captures successfully.
        assert!(pipeline.observe().unwrap().is_some());
    }

    #[test]
    fn test_file_trigger_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = dir.path().join("motion");
        let mut sensor = FileTriggerSensor::new(&trigger);

        assert!(!sensor.motion_detected());
        std::fs::write(&trigger, b"").unwrap();
        assert!(sensor.motion_detected());
        std::fs::remove_file(&trigger).unwrap();
        assert!(!sensor.motion_detected());
    }

    #[test]
    fn test_static_camera_serves_placeholder() {
        let mut camera = StaticCamera;
        let frame = camera.capture_still().unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
    }
}
