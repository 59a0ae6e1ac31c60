//! Process handles for launched jobs
//!
//! A job is owned by its monitor through a [`ProcessHandle`]. Everything
//! else (the coordinator, the shared job group) only ever sees the job's
//! [`Terminate`] side, which can be cloned and called from any task.
//!
//! ## Platform Support
//!
//! - **Unix**: [`SystemLauncher`] places every job in its own process group
//!   so that termination reaches the whole process tree.

use crate::Result;
use crate::job::{ExitReport, JobId, JobSpec};
use async_trait::async_trait;
use std::sync::Arc;

pub mod unix;

pub use unix::SystemLauncher;

/// Requests termination of a running job.
///
/// Implementations must be idempotent: calling `terminate` on a job that
/// already exited, or was already asked to stop, is a no-op. The call only
/// requests termination and never waits for the process to die.
pub trait Terminate: Send + Sync {
  fn terminate(&self) -> Result<()>;
}

/// A launched job, owned exclusively by the unit that watches it.
#[async_trait]
pub trait ProcessHandle: Send {
  fn pid(&self) -> u32;

  /// Handle used by the coordinator to cancel this job.
  fn terminator(&self) -> Arc<dyn Terminate>;

  /// Wait until the job exits on its own or after being terminated.
  async fn wait(&mut self) -> Result<ExitReport>;

  /// Check for exit without blocking on the process.
  ///
  /// After the process exited this keeps returning `None` while its captured
  /// output is still being drained, which lasts a short bounded time.
  async fn try_wait(&mut self) -> Result<Option<ExitReport>>;
}

/// Starts jobs. The seam that lets tests observe launch and termination.
pub trait Launcher: Send + Sync {
  fn launch(
    &self,
    id: JobId,
    spec: &JobSpec,
    capture_output: bool,
  ) -> Result<Box<dyn ProcessHandle>>;
}
