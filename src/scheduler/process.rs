use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Result, SubtitleError};
use crate::gpu::GraphicsCard;
use super::{JobCommand, RunningJob};

/// External program started by the scheduler, pinned to its assigned card
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub current_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            current_dir: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a path argument
    pub fn path_arg<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Run the program from `dir`
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl JobCommand for ProcessCommand {
    fn spawn(&mut self, card: &GraphicsCard) -> Result<Box<dyn RunningJob>> {
        debug!("Spawning {} {:?} on card {}", self.binary_path, self.args, card.id);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args)
            .env("CUDA_VISIBLE_DEVICES", card.id.to_string())
            .stdin(Stdio::null());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            SubtitleError::Transcription(format!("Failed to start {}: {}", self.binary_path, e))
        })?;

        Ok(Box::new(ProcessHandle {
            description: self.description.clone(),
            child,
        }))
    }

    fn describe(&self) -> String {
        format!("{}: {} {}", self.description, self.binary_path, self.args.join(" "))
    }
}

/// Handle to a spawned child process
pub struct ProcessHandle {
    description: String,
    child: Child,
}

impl RunningJob for ProcessHandle {
    fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait()? {
            // Killed by a signal: no exit code, report as failure
            Some(status) => Ok(Some(status.code().unwrap_or(-1))),
            None => Ok(None),
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to terminate {}: {}", self.description, e);
        }
    }
}
