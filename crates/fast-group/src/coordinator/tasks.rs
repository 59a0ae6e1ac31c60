//! Structured tasks: every job task applies the fail-fast rule itself under
//! the group lock, and the supervisor only awaits the tasks.

use super::{Ledger, LaunchedJob, cancel_group, job_finished, job_started, reap_after_error};
use crate::Result;
use crate::group::JobGroup;
use crate::job::{ExitReport, JobId};
use crate::process::ProcessHandle;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

pub(super) async fn run(launched: Vec<LaunchedJob>, mut ledger: Ledger) -> Ledger {
  let group = Arc::new(Mutex::new(JobGroup::new()));
  let mut tasks = JoinSet::new();

  for job in launched {
    tasks.spawn(supervise(job.id, job.handle, group.clone()));
  }

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Ok((id, Ok(report))) => ledger.record(id, report),
      Ok((_, Err(e))) => ledger.fail(e),
      Err(e) => {
        // Процесс упавшей задачи убит через kill_on_drop, остальных останавливаем
        cancel_group(&mut *group.lock().await, "a panicked job task");
        ledger.fail(e.into());
      }
    }
  }

  ledger.set_cancelled(group.lock().await.is_cancelled());
  ledger
}

async fn supervise(
  id: JobId,
  mut handle: Box<dyn ProcessHandle>,
  group: Arc<Mutex<JobGroup>>,
) -> (JobId, Result<ExitReport>) {
  debug!("Job {} started (pid {})", id, handle.pid());
  job_started(&mut *group.lock().await, id, handle.terminator());

  let report = match handle.wait().await {
    Ok(report) => {
      job_finished(&mut *group.lock().await, id, report.is_failure()).map(|()| report)
    }
    Err(e) => {
      // Ошибка ожидания важнее возможного нарушения протокола
      let _ = job_finished(&mut *group.lock().await, id, true);
      reap_after_error(id, handle.as_mut()).await;
      Err(e)
    }
  };

  (id, report)
}
