//! One monitor task per job reporting through the event queue.
//!
//! The coordinator is the only reader of the queue and the only owner of
//! the [`JobGroup`], so serialization comes from the single consumer.

use super::{Ledger, LaunchedJob, job_finished, job_started, reap_after_error};
use crate::GroupError;
use crate::event::{self, Event, EventSender};
use crate::group::JobGroup;
use crate::job::JobId;
use crate::process::ProcessHandle;
use tracing::debug;

pub(super) async fn run(launched: Vec<LaunchedJob>, mut ledger: Ledger) -> Ledger {
  let total = launched.len();
  let (events, mut receiver) = event::channel();

  for job in launched {
    tokio::spawn(monitor(job.id, job.handle, events.clone()));
  }
  // Канал закроется, когда завершатся все мониторы
  drop(events);

  let mut group = JobGroup::new();
  let mut finished = 0;

  while finished < total {
    let Some(event) = receiver.recv().await else {
      ledger.fail(GroupError::Protocol(format!(
        "event queue closed with {} job(s) unfinished",
        total - finished
      )));
      break;
    };

    match event {
      Event::Started {
        id,
        pid,
        terminator,
      } => {
        debug!("Job {} started (pid {})", id, pid);
        job_started(&mut group, id, terminator);
      }
      Event::Finished { id, report } => {
        finished += 1;
        match report {
          Ok(report) => {
            if let Err(e) = job_finished(&mut group, id, report.is_failure()) {
              ledger.fail(e);
            }
            ledger.record(id, report);
          }
          Err(e) => {
            ledger.fail(e);
            if let Err(e) = job_finished(&mut group, id, true) {
              ledger.fail(e);
            }
          }
        }
      }
    }
  }

  if !group.is_empty() {
    ledger.fail(GroupError::Protocol(format!(
      "jobs {:?} still live after every job finished",
      group.live_ids()
    )));
  }

  ledger.set_cancelled(group.is_cancelled());
  ledger
}

async fn monitor(id: JobId, mut handle: Box<dyn ProcessHandle>, events: EventSender) {
  events.started(id, handle.pid(), handle.terminator());

  let report = handle.wait().await;
  if report.is_err() {
    // Не знаем, жив ли процесс: останавливаем и дожидаемся
    reap_after_error(id, handle.as_mut()).await;
  }

  events.finished(id, report);
}
