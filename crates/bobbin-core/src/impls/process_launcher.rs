//! Process launcher: each worker is a child OS process.
//!
//! The child is started as `<program> <args...> <task-id>` and must print
//! `started <pid>` as its first stdout line before touching the store. Its
//! stderr is inherited so worker logs land next to the scheduler's.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::domain::{ExecutorId, LaunchError, TaskId};
use crate::ports::{Launcher, PendingStart};

/// First stdout line of a worker process: `started <pid>`.
pub const START_LINE_PREFIX: &str = "started";

pub fn start_line(pid: u32) -> String {
    format!("{START_LINE_PREFIX} {pid}")
}

/// Parse a start line into the executor identity it announces.
pub fn parse_start_line(line: &str) -> Option<ExecutorId> {
    let mut parts = line.split_whitespace();
    if parts.next()? != START_LINE_PREFIX {
        return None;
    }
    let pid = parts.next()?.parse::<i64>().ok()?;
    parts.next().is_none().then(|| ExecutorId::new(pid))
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Arguments placed before the task id.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extra environment for the child, on top of the inherited one.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

struct ProcessStart {
    task_id: TaskId,
    child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
}

impl ProcessStart {
    /// Hand a confirmed worker over to a background task that drains its
    /// stdout (so a late write does not hit a closed pipe) and reaps it.
    fn detach(&mut self) {
        let (Some(mut child), Some(mut lines)) = (self.child.take(), self.lines.take()) else {
            return;
        };
        let task_id = self.task_id;
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%task_id, %line, "worker stdout");
            }
            match child.wait().await {
                Ok(status) => debug!(%task_id, %status, "worker process exited"),
                Err(e) => warn!(%task_id, error = %e, "could not wait for worker process"),
            }
        });
    }
}

#[async_trait]
impl PendingStart for ProcessStart {
    async fn started(&mut self) -> Result<ExecutorId, String> {
        let Some(lines) = self.lines.as_mut() else {
            return Err("worker start already confirmed".to_string());
        };

        match lines.next_line().await {
            Ok(Some(line)) => {
                let executor = parse_start_line(&line)
                    .ok_or_else(|| format!("unexpected start line {line:?}"))?;
                self.detach();
                Ok(executor)
            }
            Ok(None) => {
                let status = self
                    .child
                    .as_mut()
                    .and_then(|child| child.try_wait().ok().flatten());
                Err(match status {
                    Some(status) => format!("worker exited before confirming start ({status})"),
                    None => "worker closed stdout before confirming start".to_string(),
                })
            }
            Err(e) => Err(format!("reading worker stdout: {e}")),
        }
    }

    fn abort(self: Box<Self>) {
        let mut this = *self;
        if let Some(mut child) = this.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(task_id = %this.task_id, error = %e, "could not kill unconfirmed worker");
            }
            // tokio reaps dropped children in the background
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(&self, task_id: TaskId) -> Result<Box<dyn PendingStart>, LaunchError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(task_id.value().to_string())
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                task_id,
                reason: e.to_string(),
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(LaunchError::Spawn {
                task_id,
                reason: "worker stdout was not captured".to_string(),
            });
        };
        debug!(%task_id, pid = child.id(), "worker process spawned");

        Ok(Box::new(ProcessStart {
            task_id,
            child: Some(child),
            lines: Some(BufReader::new(stdout).lines()),
        }))
    }
}
