//! Shared launchers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fast_group_core::{
  Backend, ExecutorSettings, ExitReport, GroupError, JobId, JobSpec, JobStatus, Launcher,
  ProcessHandle, Result, SystemLauncher, Terminate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub const BACKENDS: [Backend; 3] = [Backend::Queue, Backend::Tasks, Backend::Poll];

pub fn settings(backend: Backend) -> ExecutorSettings {
  ExecutorSettings {
    backend,
    poll_interval: Duration::from_millis(20),
    ..ExecutorSettings::default()
  }
}

/// `sh -c` job that sleeps, then exits with `code`.
pub fn job(name: &str, code: i32, sleep: f64) -> JobSpec {
  JobSpec::shell(
    "echo \"$0 start\"; sleep $2; echo \"$0 end\"; exit $1",
    &[name, &code.to_string(), &sleep.to_string()],
  )
}

/// Job ids in the order they were logged.
#[derive(Clone, Default)]
pub struct JobLog(Arc<Mutex<Vec<JobId>>>);

impl JobLog {
  pub fn push(&self, id: JobId) {
    self.0.lock().unwrap().push(id);
  }

  pub fn requests(&self) -> Vec<JobId> {
    self.0.lock().unwrap().clone()
  }

  pub fn count_for(&self, id: JobId) -> usize {
    self.requests().iter().filter(|logged| **logged == id).count()
  }
}

/// Real processes, with every termination request recorded.
#[derive(Default)]
pub struct RecordingLauncher {
  inner: SystemLauncher,
  pub log: JobLog,
  pub pids: Mutex<Vec<u32>>,
}

impl Launcher for RecordingLauncher {
  fn launch(
    &self,
    id: JobId,
    spec: &JobSpec,
    capture_output: bool,
  ) -> Result<Box<dyn ProcessHandle>> {
    let inner = self.inner.launch(id, spec, capture_output)?;
    self.pids.lock().unwrap().push(inner.pid());
    let terminator = Arc::new(Recorded {
      id,
      inner: inner.terminator(),
      log: self.log.clone(),
    });
    Ok(Box::new(RecordedHandle { inner, terminator }))
  }
}

struct Recorded {
  id: JobId,
  inner: Arc<dyn Terminate>,
  log: JobLog,
}

impl Terminate for Recorded {
  fn terminate(&self) -> Result<()> {
    self.log.push(self.id);
    self.inner.terminate()
  }
}

struct RecordedHandle {
  inner: Box<dyn ProcessHandle>,
  terminator: Arc<Recorded>,
}

#[async_trait]
impl ProcessHandle for RecordedHandle {
  fn pid(&self) -> u32 {
    self.inner.pid()
  }

  fn terminator(&self) -> Arc<dyn Terminate> {
    self.terminator.clone()
  }

  async fn wait(&mut self) -> Result<ExitReport> {
    self.inner.wait().await
  }

  async fn try_wait(&mut self) -> Result<Option<ExitReport>> {
    self.inner.try_wait().await
  }
}

/// How a scripted job ends when nobody terminates it first.
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
  Exit(i32),
  WaitError,
}

/// Launcher without processes: each job ends after a fixed delay unless
/// it is terminated first.
pub struct FakeLauncher {
  scripts: Vec<(Duration, Scripted)>,
  pub log: JobLog,
  /// Jobs whose handle reported a final state, in that order.
  pub reaped: JobLog,
}

impl FakeLauncher {
  pub fn new(scripts: Vec<(Duration, Scripted)>) -> Self {
    Self {
      scripts,
      log: JobLog::default(),
      reaped: JobLog::default(),
    }
  }

  pub fn jobs(&self) -> Vec<JobSpec> {
    (0..self.scripts.len())
      .map(|n| JobSpec::new([format!("fake-{}", n)]))
      .collect()
  }
}

impl Launcher for FakeLauncher {
  fn launch(
    &self,
    id: JobId,
    spec: &JobSpec,
    _capture_output: bool,
  ) -> Result<Box<dyn ProcessHandle>> {
    let (delay, scripted) = *self
      .scripts
      .get(id.0)
      .ok_or_else(|| GroupError::Launch {
        command: spec.display(),
        reason: "no script".to_string(),
      })?;

    Ok(Box::new(FakeHandle {
      id,
      deadline: Instant::now() + delay,
      scripted,
      wait_failed: false,
      reaped: self.reaped.clone(),
      terminator: Arc::new(FakeTerminator {
        id,
        fired_at: Mutex::new(None),
        notify: Notify::new(),
        log: self.log.clone(),
      }),
    }))
  }
}

struct FakeTerminator {
  id: JobId,
  fired_at: Mutex<Option<Instant>>,
  notify: Notify,
  log: JobLog,
}

impl Terminate for FakeTerminator {
  fn terminate(&self) -> Result<()> {
    self.log.push(self.id);
    let mut fired_at = self.fired_at.lock().unwrap();
    if fired_at.is_none() {
      *fired_at = Some(Instant::now());
      self.notify.notify_one();
    }
    Ok(())
  }
}

struct FakeHandle {
  id: JobId,
  deadline: Instant,
  scripted: Scripted,
  wait_failed: bool,
  reaped: JobLog,
  terminator: Arc<FakeTerminator>,
}

impl FakeHandle {
  /// The wait error is reported once; waiting again finds the job dead.
  fn scripted_report(&mut self) -> Result<ExitReport> {
    match self.scripted {
      Scripted::Exit(code) => Ok(self.reap(ExitReport {
        status: JobStatus::Exited(code),
        code,
        output: None,
      })),
      Scripted::WaitError if !self.wait_failed => {
        self.wait_failed = true;
        Err(GroupError::Wait {
          id: self.id,
          reason: "scripted wait failure".to_string(),
        })
      }
      Scripted::WaitError => Ok(self.reap(Self::killed())),
    }
  }

  fn reap(&self, report: ExitReport) -> ExitReport {
    self.reaped.push(self.id);
    report
  }

  fn killed() -> ExitReport {
    ExitReport {
      status: JobStatus::Killed,
      code: -15,
      output: None,
    }
  }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
  fn pid(&self) -> u32 {
    10_000 + self.id.0 as u32
  }

  fn terminator(&self) -> Arc<dyn Terminate> {
    self.terminator.clone()
  }

  async fn wait(&mut self) -> Result<ExitReport> {
    let terminator = self.terminator.clone();
    tokio::select! {
      _ = tokio::time::sleep_until(self.deadline) => self.scripted_report(),
      _ = terminator.notify.notified() => Ok(self.reap(Self::killed())),
    }
  }

  async fn try_wait(&mut self) -> Result<Option<ExitReport>> {
    // A job that exited before the request keeps its scripted exit
    let fired_at = *self.terminator.fired_at.lock().unwrap();
    if matches!(fired_at, Some(at) if at < self.deadline) {
      return Ok(Some(self.reap(Self::killed())));
    }
    if Instant::now() >= self.deadline {
      return self.scripted_report().map(Some);
    }
    Ok(None)
  }
}
