//! Single-loop backend: no monitor tasks, every live job is checked once per
//! tick. Exits are noticed at most one interval late.

use super::{Ledger, LaunchedJob, job_finished, job_started, reap_after_error};
use crate::group::JobGroup;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub(super) async fn run(
  launched: Vec<LaunchedJob>,
  mut ledger: Ledger,
  interval: Duration,
) -> Ledger {
  let mut group = JobGroup::new();
  let mut pending = launched;

  // Start is observed at launch time
  for job in &pending {
    job_started(&mut group, job.id, job.handle.terminator());
  }

  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  while !pending.is_empty() {
    ticker.tick().await;

    let mut index = 0;
    while index < pending.len() {
      match pending[index].handle.try_wait().await {
        Ok(None) => index += 1,
        Ok(Some(report)) => {
          let job = pending.remove(index);
          if let Err(e) = job_finished(&mut group, job.id, report.is_failure()) {
            ledger.fail(e);
          }
          ledger.record(job.id, report);
        }
        Err(e) => {
          let mut job = pending.remove(index);
          ledger.fail(e);
          if let Err(e) = job_finished(&mut group, job.id, true) {
            ledger.fail(e);
          }
          reap_after_error(job.id, job.handle.as_mut()).await;
        }
      }
    }
  }

  ledger.set_cancelled(group.is_cancelled());
  ledger
}
