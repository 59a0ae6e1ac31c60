//! Fail-fast execution of one job group
//!
//! [`Coordinator::execute`] launches every job, watches them through the
//! configured [`Backend`], and as soon as the first job exits with a
//! non-zero code terminates every sibling that is still live. It returns
//! only after all jobs, killed ones included, have reached a terminal state.
//!
//! A launch error aborts the call: jobs launched so far are terminated and
//! waited out before the error is returned. A failing job is not an error,
//! it shows up in the [`ExecutionResult`].

mod poll;
mod queue;
mod tasks;

use crate::config::{Backend, ExecutorSettings};
use crate::group::JobGroup;
use crate::job::{ExecutionResult, ExitReport, JobId, JobOutcome, JobSpec};
use crate::process::{Launcher, ProcessHandle, SystemLauncher, Terminate};
use crate::{GroupError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a job whose wait failed is given to be reaped after termination.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Called with each job's outcome as soon as the job is known to be done.
pub type FinishHook = Arc<dyn Fn(&JobOutcome) + Send + Sync>;

pub struct Coordinator {
  settings: ExecutorSettings,
  launcher: Arc<dyn Launcher>,
  on_finish: Option<FinishHook>,
}

impl Coordinator {
  /// Construct a coordinator spawning real processes.
  pub fn new(settings: ExecutorSettings) -> Self {
    let launcher = Arc::new(SystemLauncher::new(settings.kill_signal));
    Self::with_launcher(settings, launcher)
  }

  pub fn with_launcher(settings: ExecutorSettings, launcher: Arc<dyn Launcher>) -> Self {
    Self {
      settings,
      launcher,
      on_finish: None,
    }
  }

  pub fn on_finish<F>(mut self, hook: F) -> Self
  where
    F: Fn(&JobOutcome) + Send + Sync + 'static,
  {
    self.on_finish = Some(Arc::new(hook));
    self
  }

  /// Run `jobs` to completion under the fail-fast rule.
  pub async fn execute(&self, jobs: &[JobSpec]) -> Result<ExecutionResult> {
    let launched = self.launch_all(jobs).await?;
    info!(
      "Launched {} job(s) with {} backend",
      launched.len(),
      self.settings.backend
    );

    let ledger = Ledger::new(&launched, self.on_finish.clone());
    let ledger = match self.settings.backend {
      Backend::Queue => queue::run(launched, ledger).await,
      Backend::Tasks => tasks::run(launched, ledger).await,
      Backend::Poll => poll::run(launched, ledger, self.settings.poll_interval).await,
    };

    let result = ledger.into_result()?;
    info!(
      "Job group drained: {} job(s), cancelled: {}",
      result.outcomes.len(),
      result.cancelled
    );
    Ok(result)
  }

  async fn launch_all(&self, jobs: &[JobSpec]) -> Result<Vec<LaunchedJob>> {
    let mut launched = Vec::with_capacity(jobs.len());

    for (index, spec) in jobs.iter().enumerate() {
      let id = JobId(index);
      match self.launcher.launch(id, spec, self.settings.capture_output) {
        Ok(handle) => launched.push(LaunchedJob {
          id,
          spec: spec.clone(),
          handle,
          started_at: Instant::now(),
        }),
        Err(e) => {
          warn!(
            "Launch of job {} failed, stopping {} already running",
            id,
            launched.len()
          );
          abort_launch(launched).await;
          return Err(e);
        }
      }
    }

    Ok(launched)
  }
}

/// Terminate and reap jobs started before a launch error.
async fn abort_launch(launched: Vec<LaunchedJob>) {
  for job in &launched {
    request_termination(job.id, job.handle.terminator().as_ref());
  }
  for mut job in launched {
    if let Err(e) = job.handle.wait().await {
      warn!("Job {} could not be reaped after launch error: {}", job.id, e);
    }
  }
}

pub(crate) struct LaunchedJob {
  pub(crate) id: JobId,
  pub(crate) spec: JobSpec,
  pub(crate) handle: Box<dyn ProcessHandle>,
  pub(crate) started_at: Instant,
}

/// `Started` handling shared by every backend. The caller holds the group.
///
/// A job that shows up after cancellation was triggered is terminated right
/// away, otherwise it would outlive the failure that should have stopped it.
pub(crate) fn job_started(group: &mut JobGroup, id: JobId, terminator: Arc<dyn Terminate>) {
  if group.is_cancelled() {
    debug!("Job {} started after cancellation, terminating", id);
    request_termination(id, terminator.as_ref());
  }
  group.register(id, terminator);
}

/// `Finished` handling shared by every backend: unregister, then apply the
/// fail-fast rule. The caller holds the group, so the flag flip and the
/// victim snapshot are one step.
pub(crate) fn job_finished(group: &mut JobGroup, id: JobId, failed: bool) -> Result<()> {
  if group.unregister(id).is_none() {
    cancel_group(group, &format!("unexpected finish of job {}", id));
    return Err(GroupError::Protocol(format!(
      "finished event for job {} which is not live",
      id
    )));
  }

  // The finished job is already out of the live set, so it is never a victim
  if failed {
    cancel_group(group, &format!("failure of job {}", id));
  }

  Ok(())
}

/// Triggers cancellation unless someone already did, terminating the live set.
pub(crate) fn cancel_group(group: &mut JobGroup, cause: &str) {
  let victims = group.trigger_cancellation();
  if victims.is_empty() {
    return;
  }

  info!(
    "Cancelling after {}: terminating {} sibling(s) {:?}",
    cause,
    victims.len(),
    victims.iter().map(|(id, _)| *id).collect::<Vec<_>>()
  );
  for (id, terminator) in &victims {
    request_termination(*id, terminator.as_ref());
  }
}

/// Terminate a job whose wait failed and try once more to reap it.
///
/// Past [`REAP_TIMEOUT`] the process is left to `kill_on_drop`.
pub(crate) async fn reap_after_error(id: JobId, handle: &mut dyn ProcessHandle) {
  request_termination(id, handle.terminator().as_ref());
  match tokio::time::timeout(REAP_TIMEOUT, handle.wait()).await {
    Ok(Ok(report)) => debug!("Job {} reaped after wait error: {}", id, report.status),
    Ok(Err(e)) => warn!("Job {} could not be reaped after wait error: {}", id, e),
    Err(_) => warn!(
      "Job {} not reaped within {:?}, leaving it to kill_on_drop",
      id, REAP_TIMEOUT
    ),
  }
}

pub(crate) fn request_termination(id: JobId, terminator: &dyn Terminate) {
  if let Err(e) = terminator.terminate() {
    // Результат тот же: процесс больше не работает
    debug!("Termination request for job {} failed: {}", id, e);
  }
}

/// Collects per-job outcomes and the first internal error.
pub(crate) struct Ledger {
  slots: Vec<Slot>,
  on_finish: Option<FinishHook>,
  error: Option<GroupError>,
  cancelled: bool,
}

struct Slot {
  spec: JobSpec,
  pid: u32,
  started_at: Instant,
  outcome: Option<JobOutcome>,
}

impl Ledger {
  fn new(launched: &[LaunchedJob], on_finish: Option<FinishHook>) -> Self {
    Self {
      slots: launched
        .iter()
        .map(|job| Slot {
          spec: job.spec.clone(),
          pid: job.handle.pid(),
          started_at: job.started_at,
          outcome: None,
        })
        .collect(),
      on_finish,
      error: None,
      cancelled: false,
    }
  }

  pub(crate) fn record(&mut self, id: JobId, report: ExitReport) {
    let Some(slot) = self.slots.get_mut(id.0) else {
      self.fail(GroupError::Protocol(format!("unknown job {}", id)));
      return;
    };
    if !report.status.is_terminal() {
      self.fail(GroupError::Protocol(format!(
        "job {} reported {} as its final state",
        id, report.status
      )));
      return;
    }

    if report.is_failure() {
      warn!("Job {} ({}) ended {}", id, slot.spec.display(), report.status);
    } else {
      debug!("Job {} ({}) ended {}", id, slot.spec.display(), report.status);
    }

    let outcome = JobOutcome {
      id,
      pid: slot.pid,
      command: slot.spec.command.clone(),
      status: report.status,
      exit_code: report.code,
      output: report.output,
      duration_ms: slot.started_at.elapsed().as_millis(),
    };
    if let Some(hook) = &self.on_finish {
      hook(&outcome);
    }
    slot.outcome = Some(outcome);
  }

  /// Keeps the first error; later ones are logged only.
  pub(crate) fn fail(&mut self, error: GroupError) {
    match &self.error {
      None => self.error = Some(error),
      Some(_) => warn!("Additional error while draining job group: {}", error),
    }
  }

  pub(crate) fn set_cancelled(&mut self, cancelled: bool) {
    self.cancelled = cancelled;
  }

  fn into_result(self) -> Result<ExecutionResult> {
    if let Some(error) = self.error {
      return Err(error);
    }

    let mut outcomes = Vec::with_capacity(self.slots.len());
    for (index, slot) in self.slots.into_iter().enumerate() {
      match slot.outcome {
        Some(outcome) => outcomes.push(outcome),
        None => {
          return Err(GroupError::Protocol(format!(
            "job {} never reported a terminal state",
            JobId(index)
          )));
        }
      }
    }

    Ok(ExecutionResult {
      outcomes,
      cancelled: self.cancelled,
    })
  }
}
