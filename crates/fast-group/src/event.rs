//! Start/finish notifications from job monitors to the coordinator
//!
//! The channel is unbounded: a monitor never blocks or drops an event
//! because the coordinator is busy. Events of one job travel through the
//! same sender, so `Started` is always received before that job's
//! `Finished`. Nothing is promised about order across jobs.

use crate::Result;
use crate::job::{ExitReport, JobId};
use crate::process::Terminate;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub enum Event {
  Started {
    id: JobId,
    pid: u32,
    terminator: Arc<dyn Terminate>,
  },
  Finished {
    id: JobId,
    report: Result<ExitReport>,
  },
}

impl Event {
  pub fn id(&self) -> JobId {
    match self {
      Event::Started { id, .. } | Event::Finished { id, .. } => *id,
    }
  }
}

impl fmt::Debug for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Event::Started { id, pid, .. } => f
        .debug_struct("Started")
        .field("id", id)
        .field("pid", pid)
        .finish(),
      Event::Finished { id, report } => f
        .debug_struct("Finished")
        .field("id", id)
        .field("report", report)
        .finish(),
    }
  }
}

pub fn channel() -> (EventSender, EventReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventSender(tx), EventReceiver(rx))
}

#[derive(Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
  pub fn started(&self, id: JobId, pid: u32, terminator: Arc<dyn Terminate>) {
    self.send(Event::Started {
      id,
      pid,
      terminator,
    });
  }

  pub fn finished(&self, id: JobId, report: Result<ExitReport>) {
    self.send(Event::Finished { id, report });
  }

  fn send(&self, event: Event) {
    if let Err(e) = self.0.send(event) {
      // Координатор уже вышел, событие некому доставить
      debug!("Dropping event for job {}: receiver closed", e.0.id());
    }
  }
}

pub struct EventReceiver(mpsc::UnboundedReceiver<Event>);

impl EventReceiver {
  /// Waits for the next event. `None` once every sender is gone.
  pub async fn recv(&mut self) -> Option<Event> {
    self.0.recv().await
  }
}
