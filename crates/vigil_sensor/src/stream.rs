//! Owned wrapper around the external video-streaming child process.
//!
//! The mode state machine is the only owner of a `StreamProcess`; nothing
//! else starts, stops, or inspects the child. `stop` is idempotent and
//! `is_running` notices a child that exited on its own, so a stale handle
//! never masquerades as a live stream.

use crate::SensorError;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Program plus arguments for the streaming child.
///
/// Parsed from a flat command string on whitespace; there is no shell, so
/// no quoting or expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StreamCommand {
    /// Parse `"mjpg_streamer -i input_raspicam.so"` into program + args.
    ///
    /// Returns `None` for an empty/blank command string.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let program = parts.next()?.to_string();
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// The streaming child process as an owned resource.
pub struct StreamProcess {
    command: StreamCommand,
    child: Option<Child>,
}

impl StreamProcess {
    pub fn new(command: StreamCommand) -> Self {
        Self {
            command,
            child: None,
        }
    }

    /// Start the child if nothing is tracked as running.
    ///
    /// A second start while a child is tracked is a no-op; there is never
    /// more than one child per process handle.
    pub fn start(&mut self) -> Result<(), SensorError> {
        if self.is_running() {
            debug!("Stream process already running (pid {:?})", self.pid());
            return Ok(());
        }

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SensorError::StreamSpawn {
                command: self.command.display(),
                source,
            })?;

        info!("Stream process started (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    /// Stop the child if one is tracked. Safe to call at any time.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("Stopping stream process (pid {})", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Whether a tracked child is still alive.
    ///
    /// Consults `try_wait` so a child that died on its own is untracked
    /// here instead of lingering as a stale handle.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!("Stream process exited on its own: {}", status);
                    self.child = None;
                    false
                }
                Err(e) => {
                    warn!("Could not poll stream process: {}", e);
                    self.child = None;
                    false
                }
            },
        }
    }

    /// Pid of the tracked child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Drop for StreamProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
