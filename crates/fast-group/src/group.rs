use crate::job::JobId;
use crate::process::Terminate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared state of one execution batch.
///
/// Holds the jobs that have started but are not yet known to be terminal,
/// plus the one-shot cancellation flag. Callers serialize access through a
/// single lock (or a single owning task), which is what makes
/// [`JobGroup::trigger_cancellation`] race-free.
#[derive(Default)]
pub struct JobGroup {
  // JobId is the launch index, so key order is launch order
  live: BTreeMap<JobId, Arc<dyn Terminate>>,
  cancellation_triggered: bool,
}

impl JobGroup {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, id: JobId, terminator: Arc<dyn Terminate>) {
    self.live.insert(id, terminator);
  }

  /// Returns `None` when `id` was not live.
  pub fn unregister(&mut self, id: JobId) -> Option<Arc<dyn Terminate>> {
    self.live.remove(&id)
  }

  pub fn live_ids(&self) -> Vec<JobId> {
    self.live.keys().copied().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.live.is_empty()
  }

  /// Check-and-set of the cancellation flag. Only the first caller gets `true`.
  pub fn mark_cancelled(&mut self) -> bool {
    if self.cancellation_triggered {
      return false;
    }
    self.cancellation_triggered = true;
    true
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancellation_triggered
  }

  /// Marks the group cancelled and returns the jobs to terminate.
  ///
  /// The snapshot is taken together with the flag flip, so the victims are
  /// exactly the jobs live at that instant. Empty when cancellation had
  /// already been triggered by someone else.
  pub fn trigger_cancellation(&mut self) -> Vec<(JobId, Arc<dyn Terminate>)> {
    if !self.mark_cancelled() {
      return Vec::new();
    }
    self
      .live
      .iter()
      .map(|(id, terminator)| (*id, terminator.clone()))
      .collect()
  }
}

impl std::fmt::Debug for JobGroup {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobGroup")
      .field("live", &self.live_ids())
      .field("cancellation_triggered", &self.cancellation_triggered)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Result;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::Mutex;

  #[derive(Default)]
  struct Counter(AtomicUsize);

  impl Terminate for Counter {
    fn terminate(&self) -> Result<()> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[test]
  fn test_register_and_unregister() {
    let mut group = JobGroup::new();
    group.register(JobId(2), Arc::new(Counter::default()));
    group.register(JobId(0), Arc::new(Counter::default()));
    group.register(JobId(1), Arc::new(Counter::default()));

    assert_eq!(group.live_ids(), [JobId(0), JobId(1), JobId(2)]);
    assert!(group.unregister(JobId(1)).is_some());
    assert!(group.unregister(JobId(1)).is_none());
    assert_eq!(group.live_ids().len(), 2);
  }

  #[test]
  fn test_mark_cancelled_once() {
    let mut group = JobGroup::new();
    assert!(!group.is_cancelled());
    assert!(group.mark_cancelled());
    assert!(!group.mark_cancelled());
    assert!(group.is_cancelled());
  }

  #[test]
  fn test_trigger_cancellation_snapshots_live_set() {
    let mut group = JobGroup::new();
    group.register(JobId(0), Arc::new(Counter::default()));
    group.register(JobId(1), Arc::new(Counter::default()));
    group.unregister(JobId(0));

    let victims: Vec<JobId> = group.trigger_cancellation().into_iter().map(|(id, _)| id).collect();
    assert_eq!(victims, [JobId(1)]);
    assert!(group.trigger_cancellation().is_empty());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_failures_trigger_once() {
    let group = Arc::new(Mutex::new(JobGroup::new()));
    let sibling = Arc::new(Counter::default());
    group.lock().await.register(JobId(99), sibling.clone());

    let mut tasks = Vec::new();
    for _ in 0..16 {
      let group = group.clone();
      tasks.push(tokio::spawn(async move {
        let victims = group.lock().await.trigger_cancellation();
        for (_, terminator) in &victims {
          terminator.terminate().unwrap();
        }
        !victims.is_empty()
      }));
    }

    let mut winners = 0;
    for task in tasks {
      if task.await.unwrap() {
        winners += 1;
      }
    }

    assert_eq!(winners, 1);
    assert_eq!(sibling.0.load(Ordering::SeqCst), 1);
  }
}
