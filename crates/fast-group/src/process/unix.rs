//! Unix job processes spawned in their own process group
//!
//! Every job calls `setsid()` before `exec`, which makes it the leader of a
//! fresh session and process group. Termination is then delivered with
//! `killpg`, so anything the job forked on its own is signalled as well.
//!
//! ## Exit classification
//!
//! - exit code `c` is reported as `Exited(c)`
//! - death by signal `s` is reported with code `-s`
//! - a death by signal after [`Terminate::terminate`] was called is `Killed`
//!
//! ## Leftover processes
//!
//! The job is over once its leader is reaped. Whatever the leader left behind
//! in its group then gets the same signal, and captured output is read for at
//! most [`OUTPUT_GRACE`] longer, so a background writer holding the pipes
//! open cannot delay the exit report.

// pre_exec requires unsafe for the setsid() call in the forked child
#![allow(unsafe_code)]

use super::{Launcher, ProcessHandle, Terminate};
use crate::job::{ExitReport, JobId, JobSpec, JobStatus};
use crate::{GroupError, Result};
use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// How long output is still read after the job's leader exited.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Launches jobs as real child processes.
#[derive(Debug, Clone, Copy)]
pub struct SystemLauncher {
  signal: Signal,
}

impl SystemLauncher {
  /// `signal` is what [`Terminate::terminate`] delivers to the job's group.
  pub fn new(signal: Signal) -> Self {
    Self { signal }
  }
}

impl Default for SystemLauncher {
  fn default() -> Self {
    Self::new(Signal::SIGTERM)
  }
}

impl Launcher for SystemLauncher {
  fn launch(
    &self,
    id: JobId,
    spec: &JobSpec,
    capture_output: bool,
  ) -> Result<Box<dyn ProcessHandle>> {
    let process = spawn(id, spec, capture_output, self.signal)?;
    Ok(Box::new(process))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
  Running,
  TerminationRequested,
  Exited,
}

#[derive(Debug)]
struct GroupSignal {
  pid: Pid,
  signal: Signal,
  lifecycle: Mutex<Lifecycle>,
}

impl GroupSignal {
  /// Marks the process as reaped, returning whether termination was requested.
  fn mark_exited(&self) -> bool {
    let mut lifecycle = self
      .lifecycle
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let requested = *lifecycle == Lifecycle::TerminationRequested;
    *lifecycle = Lifecycle::Exited;
    requested
  }

  /// Signal what is left of the group after its leader was reaped.
  fn signal_leftovers(&self) {
    match killpg(self.pid, self.signal) {
      Ok(()) => debug!("Sent {} to leftovers of process group {}", self.signal, self.pid),
      Err(nix::errno::Errno::ESRCH) => {}
      Err(e) => warn!(
        "Failed to send {} to leftovers of process group {}: {}",
        self.signal, self.pid, e
      ),
    }
  }
}

impl Terminate for GroupSignal {
  fn terminate(&self) -> Result<()> {
    let mut lifecycle = self
      .lifecycle
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if *lifecycle != Lifecycle::Running {
      debug!("Process group {} already {:?}, skipping", self.pid, *lifecycle);
      return Ok(());
    }
    *lifecycle = Lifecycle::TerminationRequested;

    match killpg(self.pid, self.signal) {
      Ok(()) => debug!("Sent {} to process group {}", self.signal, self.pid),
      // Группа уже завершилась или сменила владельца
      Err(nix::errno::Errno::ESRCH) | Err(nix::errno::Errno::EPERM) => {
        debug!("Process group {} already gone", self.pid)
      }
      Err(e) => warn!(
        "Failed to send {} to process group {}: {}",
        self.signal, self.pid, e
      ),
    }

    Ok(())
  }
}

/// A job running as a child process in its own process group.
#[derive(Debug)]
pub struct ChildProcess {
  id: JobId,
  child: Child,
  group: Arc<GroupSignal>,
  output: Option<OutputReader>,
  /// Set once the leader is reaped: its status and whether it was terminated.
  exit: Option<(ExitStatus, bool)>,
}

#[derive(Debug)]
struct OutputReader {
  leader_exited: Option<oneshot::Sender<()>>,
  task: JoinHandle<io::Result<Vec<u8>>>,
}

impl ChildProcess {
  fn leader_exited(&mut self, status: ExitStatus) -> (ExitStatus, bool) {
    let requested = self.group.mark_exited();
    self.group.signal_leftovers();
    if let Some(tx) = self
      .output
      .as_mut()
      .and_then(|reader| reader.leader_exited.take())
    {
      let _ = tx.send(());
    }
    self.exit = Some((status, requested));
    (status, requested)
  }

  fn output_pending(&self) -> bool {
    self
      .output
      .as_ref()
      .is_some_and(|reader| !reader.task.is_finished())
  }

  async fn finish(&mut self, status: ExitStatus, requested: bool) -> Result<ExitReport> {
    let output = match self.output.take() {
      Some(reader) => Some(reader.task.await?.map_err(|e| GroupError::Wait {
        id: self.id,
        reason: format!("reading output failed: {}", e),
      })?),
      None => None,
    };

    let report = classify(status, requested, output);
    debug!("Job {} (pid {}) finished: {}", self.id, self.group.pid, report.status);
    Ok(report)
  }

  fn wait_error(&self, e: io::Error) -> GroupError {
    error!("Failed to wait for process {}: {}", self.group.pid, e);
    GroupError::Wait {
      id: self.id,
      reason: e.to_string(),
    }
  }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
  fn pid(&self) -> u32 {
    self.group.pid.as_raw() as u32
  }

  fn terminator(&self) -> Arc<dyn Terminate> {
    self.group.clone()
  }

  async fn wait(&mut self) -> Result<ExitReport> {
    let (status, requested) = match self.exit {
      Some(exit) => exit,
      None => {
        let status = self.child.wait().await.map_err(|e| self.wait_error(e))?;
        self.leader_exited(status)
      }
    };
    self.finish(status, requested).await
  }

  async fn try_wait(&mut self) -> Result<Option<ExitReport>> {
    let (status, requested) = match self.exit {
      Some(exit) => exit,
      None => match self.child.try_wait().map_err(|e| self.wait_error(e))? {
        Some(status) => self.leader_exited(status),
        None => return Ok(None),
      },
    };

    // Остаток вывода дочитывается в фоне, не дольше OUTPUT_GRACE
    if self.output_pending() {
      return Ok(None);
    }
    Ok(Some(self.finish(status, requested).await?))
  }
}

fn classify(
  status: ExitStatus,
  termination_requested: bool,
  output: Option<Vec<u8>>,
) -> ExitReport {
  match (status.code(), status.signal()) {
    (Some(code), _) => ExitReport {
      status: JobStatus::Exited(code),
      code,
      output,
    },
    (None, Some(signal)) => ExitReport {
      status: if termination_requested {
        JobStatus::Killed
      } else {
        JobStatus::Exited(-signal)
      },
      code: -signal,
      output,
    },
    (None, None) => ExitReport {
      status: JobStatus::Exited(-1),
      code: -1,
      output,
    },
  }
}

/// Spawn a job in a new session and process group.
///
/// The executable is resolved up front so that a missing binary is reported
/// as a launch error naming the command instead of a bare `ENOENT`.
pub fn spawn(
  id: JobId,
  spec: &JobSpec,
  capture_output: bool,
  signal: Signal,
) -> Result<ChildProcess> {
  let program = spec
    .program()
    .ok_or_else(|| GroupError::launch(&spec.command, "empty command"))?;
  let resolved = which::which(program).map_err(|e| GroupError::launch(&spec.command, e))?;

  debug!("Spawning job {}: {:?} {:?}", id, resolved, spec.args());

  let mut command = Command::new(&resolved);
  command.args(spec.args());
  command.stdin(Stdio::null());
  command.kill_on_drop(true);
  if capture_output {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
  }

  // Safety: setsid() is async-signal-safe and runs in the child before exec
  unsafe {
    command.pre_exec(|| {
      if libc::setsid() == -1 {
        return Err(io::Error::last_os_error());
      }
      Ok(())
    });
  }

  let mut child = command.spawn().map_err(|e| {
    error!("Failed to spawn '{}': {}", spec.display(), e);
    GroupError::launch(&spec.command, e)
  })?;
  // Закрываем копии pipe в родителе, иначе чтение не дождётся EOF
  drop(command);

  let raw_pid = child
    .id()
    .ok_or_else(|| GroupError::launch(&spec.command, "spawned child has no pid"))?;
  let pid = Pid::from_raw(raw_pid as i32);

  let output = if capture_output {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (leader_exited, exited) = oneshot::channel();
    Some(OutputReader {
      leader_exited: Some(leader_exited),
      task: tokio::spawn(collect_output(stdout, stderr, exited)),
    })
  } else {
    None
  };

  debug!("Job {} running as pid {}", id, pid);

  Ok(ChildProcess {
    id,
    child,
    group: Arc::new(GroupSignal {
      pid,
      signal,
      lifecycle: Mutex::new(Lifecycle::Running),
    }),
    output,
    exit: None,
  })
}

/// Drain stdout and stderr into one buffer in arrival order.
///
/// Stops at EOF on both pipes, or [`OUTPUT_GRACE`] after `leader_exited`
/// fires, whichever comes first.
async fn collect_output(
  mut stdout: Option<ChildStdout>,
  mut stderr: Option<ChildStderr>,
  mut leader_exited: oneshot::Receiver<()>,
) -> io::Result<Vec<u8>> {
  let mut combined = Vec::new();
  let mut out_buf = [0u8; 4096];
  let mut err_buf = [0u8; 4096];
  let mut give_up_at: Option<Instant> = None;

  while stdout.is_some() || stderr.is_some() {
    tokio::select! {
      read = read_chunk(&mut stdout, &mut out_buf) => match read? {
        0 => stdout = None,
        n => combined.extend_from_slice(&out_buf[..n]),
      },
      read = read_chunk(&mut stderr, &mut err_buf) => match read? {
        0 => stderr = None,
        n => combined.extend_from_slice(&err_buf[..n]),
      },
      _ = &mut leader_exited, if give_up_at.is_none() => {
        give_up_at = Some(Instant::now() + OUTPUT_GRACE);
      }
      () = tokio::time::sleep_until(give_up_at.unwrap_or_else(Instant::now)),
        if give_up_at.is_some() =>
      {
        debug!("Output pipes still open {:?} after job exit, dropping them", OUTPUT_GRACE);
        break;
      }
    }
  }

  Ok(combined)
}

async fn read_chunk<R: AsyncRead + Unpin>(
  reader: &mut Option<R>,
  buf: &mut [u8],
) -> io::Result<usize> {
  match reader {
    Some(reader) => reader.read(buf).await,
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  fn launch(spec: JobSpec, capture: bool) -> ChildProcess {
    spawn(JobId(0), &spec, capture, Signal::SIGTERM).expect("Failed to spawn")
  }

  #[tokio::test]
  async fn test_process_is_group_leader() {
    let mut child = launch(JobSpec::new(["sleep", "0.2"]), false);
    let pgid = nix::unistd::getpgid(Some(child.group.pid)).expect("getpgid");
    assert_eq!(pgid, child.group.pid);
    assert_ne!(pgid, nix::unistd::getpgrp());
    child.wait().await.expect("wait");
  }

  #[tokio::test]
  async fn test_wait_reports_exit_code_and_output() {
    let mut child = launch(JobSpec::shell("echo out; echo err >&2; exit 3", &[]), true);
    let report = child.wait().await.expect("wait");
    assert_eq!(report.status, JobStatus::Exited(3));
    assert_eq!(report.code, 3);

    let text = String::from_utf8(report.output.expect("captured")).unwrap();
    assert!(text.contains("out\n"));
    assert!(text.contains("err\n"));
  }

  #[tokio::test]
  async fn test_no_capture_returns_no_output() {
    let mut child = launch(JobSpec::new(["true"]), false);
    let report = child.wait().await.expect("wait");
    assert_eq!(report.status, JobStatus::Exited(0));
    assert!(report.output.is_none());
  }

  #[tokio::test]
  async fn test_terminate_marks_killed() {
    let mut child = launch(JobSpec::new(["sleep", "30"]), true);
    child.terminator().terminate().expect("terminate");
    let report = tokio::time::timeout(Duration::from_secs(5), child.wait())
      .await
      .expect("killed process should exit")
      .expect("wait");
    assert_eq!(report.status, JobStatus::Killed);
    assert_eq!(report.code, -(Signal::SIGTERM as i32));
  }

  #[tokio::test]
  async fn test_terminate_after_exit_is_noop() {
    let mut child = launch(JobSpec::new(["true"]), false);
    let terminator = child.terminator();
    let report = child.wait().await.expect("wait");
    assert!(terminator.terminate().is_ok());
    assert!(terminator.terminate().is_ok());
    assert_eq!(report.status, JobStatus::Exited(0));
  }

  #[tokio::test]
  async fn test_external_signal_is_not_killed() {
    let mut child = launch(JobSpec::new(["sleep", "30"]), false);
    killpg(child.group.pid, Signal::SIGKILL).expect("killpg");
    let report = child.wait().await.expect("wait");
    assert_eq!(report.status, JobStatus::Exited(-(Signal::SIGKILL as i32)));
    assert!(report.is_failure());
  }

  #[tokio::test]
  async fn test_try_wait_polls_until_exit() {
    let mut child = launch(JobSpec::shell("sleep 0.2; echo done", &[]), true);
    assert!(child.try_wait().await.expect("try_wait").is_none());

    let report = loop {
      if let Some(report) = child.try_wait().await.expect("try_wait") {
        break report;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(report.output.as_deref(), Some(&b"done\n"[..]));
  }

  #[tokio::test]
  async fn test_wait_returns_when_leader_exits() {
    // Фоновый sleep держит pipe открытым
    let mut child = launch(JobSpec::shell("sleep 30 & echo started; exit 4", &[]), true);
    let report = tokio::time::timeout(Duration::from_secs(5), child.wait())
      .await
      .expect("wait should not block on the background writer")
      .expect("wait");

    assert_eq!(report.status, JobStatus::Exited(4));
    assert_eq!(report.output.as_deref(), Some(&b"started\n"[..]));
  }

  #[tokio::test]
  async fn test_try_wait_does_not_block_on_open_pipes() {
    let mut child = launch(JobSpec::shell("sleep 30 & exit 0", &[]), true);
    let started = Instant::now();

    let report = loop {
      let polled = tokio::time::timeout(Duration::from_millis(500), child.try_wait())
        .await
        .expect("try_wait must return promptly")
        .expect("try_wait");
      if let Some(report) = polled {
        break report;
      }
      assert!(started.elapsed() < Duration::from_secs(5), "job never reported");
      tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(report.status, JobStatus::Exited(0));
  }

  #[tokio::test]
  async fn test_spawn_missing_binary() {
    let result = spawn(
      JobId(1),
      &JobSpec::new(["nonexistent_command_12345"]),
      false,
      Signal::SIGTERM,
    );
    match result {
      Err(GroupError::Launch { command, .. }) => assert_eq!(command, "nonexistent_command_12345"),
      other => panic!("Expected launch error, got: {:?}", other.map(|c| c.pid())),
    }
  }

  #[tokio::test]
  async fn test_spawn_empty_command() {
    let result = spawn(JobId(0), &JobSpec::new(Vec::<String>::new()), false, Signal::SIGTERM);
    assert!(matches!(result, Err(GroupError::Launch { .. })));
  }
}
