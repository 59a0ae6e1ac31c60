use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum GroupError {
  #[error("Failed to launch '{command}': {reason}")]
  Launch { command: String, reason: String },

  #[error("Failed to wait for job {id}: {reason}")]
  Wait { id: JobId, reason: String },

  #[error("Coordinator protocol violation: {0}")]
  Protocol(String),

  #[error("Configuration file not found. Checked paths: {checked_paths:?}")]
  ConfigNotFound { checked_paths: Vec<PathBuf> },

  #[error("Invalid configuration in {path:?}: {details}")]
  ConfigInvalid { path: PathBuf, details: String },

  #[error("Invalid duration '{value}': {reason}")]
  InvalidDuration { value: String, reason: String },

  #[error("Tracing initialization failed: {0}")]
  Init(String),

  #[error("Task join error: {0}")]
  TaskJoin(#[from] tokio::task::JoinError),
}

impl GroupError {
  pub(crate) fn launch(command: &[String], reason: impl ToString) -> Self {
    GroupError::Launch {
      command: command.join(" "),
      reason: reason.to_string(),
    }
  }

  /// Errors that abort `execute` before any job result is produced.
  pub fn is_launch(&self) -> bool {
    matches!(self, GroupError::Launch { .. })
  }
}

pub type Result<T> = std::result::Result<T, GroupError>;
