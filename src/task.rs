//! Background tasks - child processes with no terminal attached
//!
//! Tasks keep the daemon alive the same way sessions do: they count toward
//! the presence notification and gate the auto-stop condition, but have no
//! emulation state and no observer events beyond their exit.

use crate::launcher::LaunchError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Exited { id: TaskId, status: i32 },
}

/// A detached child process tracked by the supervisor.
#[derive(Debug, Clone)]
pub struct BackgroundTask {
    id: TaskId,
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
}

impl BackgroundTask {
    /// Spawn `program` detached from any terminal. A monitor thread waits on
    /// the child and reports its exit through `events`.
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
        events: UnboundedSender<TaskEvent>,
    ) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        let id = TaskId::new();
        let pid = child.id();
        thread::spawn(move || {
            let status = child
                .wait()
                .map(|s| s.code().unwrap_or(-1))
                .unwrap_or(-1);
            let _ = events.send(TaskEvent::Exited { id, status });
        });

        Ok(Self {
            id,
            pid,
            command: program.to_string(),
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
