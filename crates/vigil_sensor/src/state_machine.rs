//! Per-sensor mode state machine.
//!
//! Owns the current [`Mode`] and the streaming child process. All mode
//! changes flow through [`ModeStateMachine::apply`]; the polling loop never
//! touches the process handle directly.
//!
//! Transition rules:
//! - commands addressed to another sensor leave everything untouched
//! - a command equal to the current mode is a no-op (nothing restarts)
//! - entering STREAMING starts the child unless one is already tracked
//! - leaving STREAMING (or re-asserting STANDBY/SENSING) stops the child
//! - a failed stream launch keeps the prior mode; STREAMING is never
//!   reported for a process that did not start

use crate::stream::StreamProcess;
use crate::SensorError;
use tracing::{debug, info};
use vigil_protocol::{CommandMessage, Mode};

/// Outcome of applying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Mode unchanged: command for someone else, or already in that mode.
    Unchanged,
    /// Mode changed; side effects (if any) have fired.
    Changed { from: Mode, to: Mode },
}

pub struct ModeStateMachine {
    sensor_id: String,
    mode: Mode,
    stream: StreamProcess,
}

impl ModeStateMachine {
    pub fn new(sensor_id: impl Into<String>, initial_mode: Mode, stream: StreamProcess) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            mode: initial_mode,
            stream,
        }
    }

    /// Current mode. This is the value mirrored into the registry.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether a streaming child is currently tracked as alive.
    pub fn stream_running(&mut self) -> bool {
        self.stream.is_running()
    }

    /// Apply one command from the shared command channel.
    ///
    /// Returns the transition taken. A stream spawn failure is returned as
    /// an error and the prior mode is kept; the caller logs it and the
    /// loop carries on.
    pub fn apply(&mut self, cmd: &CommandMessage) -> Result<Transition, SensorError> {
        if !cmd.applies_to(&self.sensor_id) {
            debug!(
                target = %cmd.target.as_str(),
                "Command for another sensor, ignored"
            );
            return Ok(Transition::Unchanged);
        }

        let from = self.mode;
        let to = cmd.directive;

        if from == to {
            debug!(mode = %from, "Already in commanded mode, no-op");
            return Ok(Transition::Unchanged);
        }

        match to {
            Mode::Standby | Mode::Sensing => {
                self.stream.stop();
                self.mode = to;
            }
            Mode::Streaming => {
                // Start before committing the mode: a launch failure must
                // not leave the registry claiming STREAMING.
                self.stream.start()?;
                self.mode = Mode::Streaming;
            }
        }

        info!(from = %from, to = %to, "Mode changed");
        Ok(Transition::Changed { from, to })
    }

    /// Stop the streaming child. Called on loop exit.
    pub fn shutdown(&mut self) {
        self.stream.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamCommand;
    use vigil_protocol::CommandTarget;

    fn machine(initial: Mode) -> ModeStateMachine {
        let stream = StreamProcess::new(StreamCommand::parse("sleep 30").unwrap());
        ModeStateMachine::new("s1", initial, stream)
    }

    fn cmd(target: &str, directive: Mode) -> CommandMessage {
        let target = if target == "all" {
            CommandTarget::All
        } else {
            CommandTarget::Sensor(target.to_string())
        };
        CommandMessage::new(target, directive)
    }

    #[test]
    fn test_all_sensing_from_standby_spawns_nothing() {
        let mut m = machine(Mode::Standby);

        let t = m.apply(&cmd("all", Mode::Sensing)).unwrap();
        assert_eq!(
            t,
            Transition::Changed {
                from: Mode::Standby,
                to: Mode::Sensing
            }
        );
        assert_eq!(m.mode(), Mode::Sensing);
        assert!(!m.stream_running());
    }

    #[test]
    fn test_streaming_starts_exactly_one_process() {
        let mut m = machine(Mode::Sensing);

        m.apply(&cmd("s1", Mode::Streaming)).unwrap();
        assert_eq!(m.mode(), Mode::Streaming);
        assert!(m.stream_running());
        let pid = m.stream.pid().unwrap();

        // Repeat command: idempotent, same child.
        let t = m.apply(&cmd("s1", Mode::Streaming)).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert_eq!(m.stream.pid().unwrap(), pid);

        // "all" repeat is no different.
        let t = m.apply(&cmd("all", Mode::Streaming)).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert_eq!(m.stream.pid().unwrap(), pid);

        m.shutdown();
    }

    #[test]
    fn test_leaving_streaming_stops_the_process() {
        let mut m = machine(Mode::Standby);
        m.apply(&cmd("s1", Mode::Streaming)).unwrap();
        assert!(m.stream_running());

        m.apply(&cmd("s1", Mode::Sensing)).unwrap();
        assert_eq!(m.mode(), Mode::Sensing);
        assert!(!m.stream_running());
    }

    #[test]
    fn test_same_mode_is_side_effect_free() {
        let mut m = machine(Mode::Sensing);
        let t = m.apply(&cmd("s1", Mode::Sensing)).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert_eq!(m.mode(), Mode::Sensing);
        assert!(!m.stream_running());
    }

    #[test]
    fn test_command_for_other_sensor_ignored() {
        let mut m = machine(Mode::Standby);
        let t = m.apply(&cmd("s2", Mode::Streaming)).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert_eq!(m.mode(), Mode::Standby);
        assert!(!m.stream_running());
    }

    #[test]
    fn test_failed_spawn_keeps_prior_mode() {
        let stream = StreamProcess::new(StreamCommand::parse("/nonexistent/streamer").unwrap());
        let mut m = ModeStateMachine::new("s1", Mode::Sensing, stream);

        let result = m.apply(&cmd("s1", Mode::Streaming));
        assert!(result.is_err());
        assert_eq!(m.mode(), Mode::Sensing);
        assert!(!m.stream_running());
    }

    #[test]
    fn test_standby_from_streaming_tears_down() {
        let mut m = machine(Mode::Standby);
        m.apply(&cmd("all", Mode::Streaming)).unwrap();
        assert!(m.stream_running());

        m.apply(&cmd("all", Mode::Standby)).unwrap();
        assert_eq!(m.mode(), Mode::Standby);
        assert!(!m.stream_running());
    }
}
